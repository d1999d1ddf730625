//! Genetic algorithm.
//!
//! Uniform initial population, concurrent evaluation per generation,
//! elitism on the best-ever individual, tournament selection, single-point
//! crossover and per-gene uniform-resample mutation.

use async_trait::async_trait;
use rand::Rng;

use super::{sample_range, Evaluation, SearchContext, SearchStrategy};
use crate::types::EngineResult;

pub struct GeneticAlgorithm;

#[async_trait]
impl SearchStrategy for GeneticAlgorithm {
    async fn search(&self, ctx: &mut SearchContext<'_>) -> EngineResult<()> {
        let params = ctx.parameters();
        let mut population: Vec<Vec<f64>> =
            (0..params.population_size).map(|_| ctx.sample()).collect();

        for generation in 0..params.generations {
            if ctx.should_stop() {
                break;
            }

            let evals = ctx.evaluate_all(&population).await?;
            for (individual, eval) in population.iter().zip(&evals) {
                ctx.update_best(individual, *eval);
            }
            ctx.finish_iteration();

            if ctx.check_convergence() || generation + 1 == params.generations {
                break;
            }

            let mut next = Vec::with_capacity(params.population_size);
            if let Some(elite) = ctx.best_parameters() {
                next.push(elite.to_vec());
            }
            while next.len() < params.population_size {
                let p1 = tournament_select(ctx, &population, &evals);
                let p2 = tournament_select(ctx, &population, &evals);
                let mut child = if ctx.rng.gen::<f64>() < params.crossover_rate {
                    crossover(ctx, p1, p2)
                } else {
                    p1.to_vec()
                };
                mutate(ctx, &mut child);
                next.push(child);
            }
            population = next;
        }
        Ok(())
    }
}

/// Best of `tournament_size` random draws; ties keep the earlier draw.
fn tournament_select<'p>(
    ctx: &mut SearchContext<'_>,
    population: &'p [Vec<f64>],
    evals: &[Evaluation],
) -> &'p [f64] {
    let n = population.len();
    let k = ctx.parameters().tournament_size.clamp(1, n);
    let mut best = ctx.rng.gen_range(0..n);
    for _ in 1..k {
        let challenger = ctx.rng.gen_range(0..n);
        if evals[challenger].fitness() < evals[best].fitness() {
            best = challenger;
        }
    }
    &population[best]
}

/// Single-point crossover: head of `p1`, tail of `p2`.
fn crossover(ctx: &mut SearchContext<'_>, p1: &[f64], p2: &[f64]) -> Vec<f64> {
    let dims = p1.len();
    if dims < 2 {
        return p1.to_vec();
    }
    let point = ctx.rng.gen_range(1..dims);
    p1[..point].iter().chain(&p2[point..]).copied().collect()
}

/// Resample each gene uniformly in its bounds with probability `mutation_rate`.
fn mutate(ctx: &mut SearchContext<'_>, genome: &mut [f64]) {
    let rate = ctx.parameters().mutation_rate;
    let constraints = ctx.constraints();
    for (i, gene) in genome.iter_mut().enumerate() {
        if ctx.rng.gen::<f64>() < rate {
            *gene = sample_range(&mut ctx.rng, constraints.min[i], constraints.max[i]);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
