//! Simulated annealing.
//!
//! Single walker with box-clamped neighbor moves. Worse neighbors are
//! accepted with probability `exp(−Δ / T)`; the temperature decays
//! geometrically by `cooling_rate` each iteration.

use async_trait::async_trait;
use rand::Rng;

use super::{Evaluation, SearchContext, SearchStrategy};
use crate::types::EngineResult;

const MIN_TEMPERATURE: f64 = 1e-12;

pub struct SimulatedAnnealing;

#[async_trait]
impl SearchStrategy for SimulatedAnnealing {
    async fn search(&self, ctx: &mut SearchContext<'_>) -> EngineResult<()> {
        let params = ctx.parameters();
        let constraints = ctx.constraints();

        let mut current = ctx.sample();
        let mut current_eval = ctx.evaluate(&current).await?;
        ctx.update_best(&current, current_eval);
        let mut temperature = params.initial_temperature;

        for iteration in 0..params.max_iterations {
            if ctx.should_stop() {
                break;
            }

            let mut candidate: Vec<f64> = current
                .iter()
                .zip(constraints.min.iter().zip(&constraints.max))
                .map(|(x, (lo, hi))| {
                    let step: f64 = ctx.rng.gen_range(-1.0..=1.0);
                    x + step * params.step_size * (hi - lo)
                })
                .collect();
            constraints.clamp(&mut candidate);

            let eval = ctx.evaluate(&candidate).await?;
            let roll: f64 = ctx.rng.gen();
            if accept(current_eval, eval, temperature, roll) {
                current = candidate;
                current_eval = eval;
                ctx.update_best(&current, current_eval);
            }
            ctx.finish_iteration();

            if ctx.check_convergence() || iteration + 1 == params.max_iterations {
                break;
            }
            temperature = (temperature * params.cooling_rate).max(MIN_TEMPERATURE);
        }
        Ok(())
    }
}

/// Metropolis acceptance. A feasible move always beats an infeasible
/// position; an infeasible move is only taken from an infeasible position.
fn accept(current: Evaluation, candidate: Evaluation, temperature: f64, roll: f64) -> bool {
    match (current, candidate) {
        (_, Evaluation::ConstraintViolated) => !current.is_feasible(),
        (Evaluation::ConstraintViolated, Evaluation::Cost(_)) => true,
        (Evaluation::Cost(c), Evaluation::Cost(n)) => {
            let delta = n - c;
            delta <= 0.0 || roll < (-delta / temperature).exp()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::tests::{sphere, unit_box};
    use super::super::*;
    use super::accept;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_acceptance_rule() {
        let c = Evaluation::Cost;
        assert!(accept(c(1.0), c(0.5), 1.0, 0.99));
        // Δ = 1 at T = 1 → p ≈ 0.368
        assert!(accept(c(1.0), c(2.0), 1.0, 0.3));
        assert!(!accept(c(1.0), c(2.0), 1.0, 0.4));
        assert!(!accept(c(1.0), Evaluation::ConstraintViolated, 1e9, 0.0));
        assert!(accept(Evaluation::ConstraintViolated, c(5.0), 1e-9, 0.99));
    }

    #[tokio::test]
    async fn test_sphere() {
        let mut config = OptimizationConfig::new(OptimizerKind::SimulatedAnnealing, unit_box(2));
        config.parameters.max_iterations = 2000;
        config.parameters.initial_temperature = 0.5;
        config.parameters.cooling_rate = 0.995;
        config.convergence.window = 0;
        config.seed = Some(21);
        let result = OptimizationEngine::new()
            .optimize(&config, &FnObjective(sphere), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(result.best_value < 0.01, "best = {}", result.best_value);
        assert_eq!(result.metadata.strategy, OptimizerKind::SimulatedAnnealing);
        // One initial evaluation plus one per iteration.
        assert_eq!(result.metadata.evaluations, 2001);
        for pair in result.history.windows(2) {
            assert!(pair[1].best_value <= pair[0].best_value);
        }
    }

    #[tokio::test]
    async fn test_equality_constraint_stays_infeasible_until_hit() {
        // Equality constraints are nearly impossible to hit by random moves;
        // a run that never finds a feasible point is an optimization error.
        let mut config = OptimizationConfig::new(OptimizerKind::SimulatedAnnealing, unit_box(2));
        config.parameters.max_iterations = 50;
        config.constraints.equality_tolerance = 0.0;
        config
            .constraints
            .equality
            .push(LinearConstraint::new(vec![1.0, 1.0], 0.123456789));
        config.seed = Some(3);
        let err = OptimizationEngine::new()
            .optimize(&config, &FnObjective(sphere), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::types::EngineError::Optimization(_)));
    }
}
