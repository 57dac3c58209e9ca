//! Bounded derivative-free maximization.
//!
//! A seeded stochastic search: candidates are drawn either uniformly from
//! the whole box or around the best point so far, with a step size that
//! grows on success and shrinks on repeated failure. The same seed always
//! produces the same sequence of evaluations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Every n-th candidate is drawn from the whole search box.
const GLOBAL_SAMPLE_PERIOD: u32 = 4;

/// When to stop the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCriteria {
    max_iterations: u32,
    rel_score_diff: f64,
    stop_score: f64,
}

impl Default for StopCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            rel_score_diff: 1e-6,
            stop_score: f64::INFINITY,
        }
    }
}

impl StopCriteria {
    /// Maximum number of objective evaluations.
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    /// Stop once an improvement is smaller than this fraction of the score.
    pub fn relative_score_difference(mut self, d: f64) -> Self {
        self.rel_score_diff = d;
        self
    }

    /// Stop as soon as a score at least this good is found.
    pub fn stop_score(mut self, s: f64) -> Self {
        self.stop_score = s;
        self
    }
}

/// Best point found and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptResult<const N: usize> {
    /// Arguments of the best evaluation.
    pub optimum: [f64; N],
    /// Objective value at `optimum`.
    pub score: f64,
    /// Number of objective evaluations performed.
    pub evaluations: u32,
}

/// Seeded maximizer over an axis-aligned box.
#[derive(Debug, Clone, Copy)]
pub struct Optimizer {
    stop: StopCriteria,
    seed: u64,
}

impl Optimizer {
    /// Create an optimizer with seed `0`.
    pub fn new(stop: StopCriteria) -> Self {
        Self { stop, seed: 0 }
    }

    /// Use a different seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Maximize `f` within `bounds`, starting from `init`.
    ///
    /// `init` is clamped into the bounds. Non-finite lower bounds are not
    /// supported. NaN scores rank below everything else.
    pub fn maximize<const N: usize, F>(
        &self,
        mut f: F,
        init: [f64; N],
        bounds: [(f64, f64); N],
    ) -> OptResult<N>
    where
        F: FnMut(&[f64; N]) -> f64,
    {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut eval = |x: &[f64; N]| {
            let s = f(x);
            if s.is_nan() { f64::NEG_INFINITY } else { s }
        };

        let mut best = init;
        for (x, (lo, hi)) in best.iter_mut().zip(bounds) {
            *x = x.clamp(lo, hi);
        }
        let mut best_score = eval(&best);
        let mut evaluations = 1;

        let span: [f64; N] = bounds.map(|(lo, hi)| hi - lo);
        let mut step: [f64; N] = span.map(|s| 0.25 * s);
        let mut failures = 0;

        while evaluations < self.stop.max_iterations && best_score < self.stop.stop_score {
            let mut cand = best;
            if evaluations % GLOBAL_SAMPLE_PERIOD == 0 {
                for (x, (lo, hi)) in cand.iter_mut().zip(bounds) {
                    *x = lo + (hi - lo) * rng.gen::<f64>();
                }
            } else {
                for i in 0..N {
                    let u: f64 = rng.gen::<f64>() * 2.0 - 1.0;
                    cand[i] = (cand[i] + u * step[i]).clamp(bounds[i].0, bounds[i].1);
                }
            }

            let score = eval(&cand);
            evaluations += 1;

            if score > best_score {
                let gain = score - best_score;
                let converged = best_score.is_finite()
                    && score.is_finite()
                    && gain <= self.stop.rel_score_diff * best_score.abs();
                best = cand;
                best_score = score;
                failures = 0;
                for i in 0..N {
                    step[i] = (step[i] * 1.5).min(span[i]);
                }
                if converged {
                    break;
                }
            } else {
                failures += 1;
                if failures >= 8 * N.max(1) {
                    failures = 0;
                    for s in step.iter_mut() {
                        *s *= 0.5;
                    }
                    if step.iter().zip(span).all(|(s, w)| *s <= 1e-9 * (w + 1.0)) {
                        break;
                    }
                }
            }
        }

        OptResult {
            optimum: best,
            score: best_score,
            evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn paraboloid(x: &[f64; 2]) -> f64 {
        -(x[0] - 1.0).powi(2) - (x[1] + 2.0).powi(2)
    }

    #[test]
    fn test_finds_interior_maximum() {
        let opt = Optimizer::new(StopCriteria::default().relative_score_difference(0.0));
        let res = opt.maximize(paraboloid, [4.0, 4.0], [(-5.0, 5.0), (-5.0, 5.0)]);
        assert_abs_diff_eq!(res.optimum[0], 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(res.optimum[1], -2.0, epsilon = 0.05);
        assert!(res.evaluations <= 1000);
    }

    #[test]
    fn test_respects_bounds() {
        let opt = Optimizer::new(StopCriteria::default());
        let res = opt.maximize(|x: &[f64; 1]| x[0], [10.0], [(0.0, 1.0)]);
        assert!(res.optimum[0] <= 1.0);
        assert!(res.optimum[0] > 0.9);
    }

    #[test]
    fn test_stop_score_short_circuits() {
        let mut calls = 0;
        let opt = Optimizer::new(StopCriteria::default().stop_score(5.0));
        let res = opt.maximize(
            |_: &[f64; 3]| {
                calls += 1;
                10.0
            },
            [0.0, 0.0, 1.0],
            [(0.0, 1.0), (0.0, 1.0), (1.0, 1.0)],
        );
        assert_eq!(calls, 1);
        assert_eq!(res.evaluations, 1);
        assert_eq!(res.optimum, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_same_seed_same_result() {
        let opt = Optimizer::new(StopCriteria::default().max_iterations(200)).seed(7);
        let a = opt.maximize(paraboloid, [0.0, 0.0], [(-5.0, 5.0), (-5.0, 5.0)]);
        let b = opt.maximize(paraboloid, [0.0, 0.0], [(-5.0, 5.0), (-5.0, 5.0)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_nan_scores_are_ignored() {
        let opt = Optimizer::new(StopCriteria::default().max_iterations(100));
        let res = opt.maximize(
            |x: &[f64; 1]| if x[0] > 0.5 { f64::NAN } else { x[0] },
            [0.1],
            [(0.0, 1.0)],
        );
        assert!(res.score.is_finite());
        assert!(res.optimum[0] <= 0.5);
    }
}
