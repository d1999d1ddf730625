//! Particle swarm optimization.
//!
//! Velocities blend inertia, pull toward each particle's personal best and
//! pull toward the swarm's best-ever position. Positions are clamped to the
//! box after every move; linear constraints are enforced through evaluation.

use async_trait::async_trait;
use rand::Rng;

use super::{Evaluation, SearchContext, SearchStrategy};
use crate::types::EngineResult;

/// Initial and maximum speed per dimension, as a fraction of its range.
const VELOCITY_SCALE: f64 = 0.2;

pub struct ParticleSwarm;

struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_fitness: f64,
}

#[async_trait]
impl SearchStrategy for ParticleSwarm {
    async fn search(&self, ctx: &mut SearchContext<'_>) -> EngineResult<()> {
        let params = ctx.parameters();
        let constraints = ctx.constraints();
        let vmax: Vec<f64> = constraints
            .min
            .iter()
            .zip(&constraints.max)
            .map(|(lo, hi)| (hi - lo) * VELOCITY_SCALE)
            .collect();

        let mut swarm: Vec<Particle> = (0..params.population_size)
            .map(|_| {
                let position = ctx.sample();
                let velocity = vmax
                    .iter()
                    .map(|v| if *v > 0.0 { ctx.rng.gen_range(-v..=*v) } else { 0.0 })
                    .collect();
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity,
                    best_fitness: Evaluation::ConstraintViolated.fitness(),
                }
            })
            .collect();

        for iteration in 0..params.max_iterations {
            if ctx.should_stop() {
                break;
            }

            let positions: Vec<Vec<f64>> = swarm.iter().map(|p| p.position.clone()).collect();
            let evals = ctx.evaluate_all(&positions).await?;
            for (particle, eval) in swarm.iter_mut().zip(&evals) {
                if eval.is_feasible() && eval.fitness() < particle.best_fitness {
                    particle.best_fitness = eval.fitness();
                    particle.best_position = particle.position.clone();
                }
                ctx.update_best(&particle.position, *eval);
            }
            ctx.finish_iteration();

            if ctx.check_convergence() || iteration + 1 == params.max_iterations {
                break;
            }

            let global_best = ctx.best_parameters().map(<[f64]>::to_vec);
            for particle in swarm.iter_mut() {
                let social_target = global_best.as_deref().unwrap_or(&particle.best_position);
                for d in 0..particle.position.len() {
                    let r1: f64 = ctx.rng.gen();
                    let r2: f64 = ctx.rng.gen();
                    let x = particle.position[d];
                    let v = params.inertia_weight * particle.velocity[d]
                        + params.cognitive_weight * r1 * (particle.best_position[d] - x)
                        + params.social_weight * r2 * (social_target[d] - x);
                    particle.velocity[d] = v.clamp(-vmax[d], vmax[d]);
                    particle.position[d] = x + particle.velocity[d];
                }
                constraints.clamp(&mut particle.position);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
