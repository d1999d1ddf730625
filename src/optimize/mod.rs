//! Optimization engine: iterative search over a constrained parameter space.
//!
//! `OptimizationEngine::optimize` validates an `OptimizationConfig`, builds a
//! per-run `SearchContext` and hands it to one `SearchStrategy` (genetic
//! algorithm, particle swarm, simulated annealing). The context owns all
//! run state: best-so-far tracking, history, convergence, progress events
//! and cancellation. Nothing survives the call.

pub mod annealing;
pub mod genetic;
pub mod swarm;

use async_trait::async_trait;
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::{EngineError, EngineResult};

/// Fitness assigned to a constraint violation when ranking candidates.
pub const VIOLATION_FITNESS: f64 = f64::MAX;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Genetic,
    ParticleSwarm,
    SimulatedAnnealing,
    /// Accepted by the config format, rejected at run time.
    Bayesian,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Genetic => write!(f, "genetic"),
            OptimizerKind::ParticleSwarm => write!(f, "particle_swarm"),
            OptimizerKind::SimulatedAnnealing => write!(f, "simulated_annealing"),
            OptimizerKind::Bayesian => write!(f, "bayesian"),
        }
    }
}

/// Algorithm knobs. Each strategy reads the ones it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmParameters {
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub tournament_size: usize,
    pub inertia_weight: f64,
    pub cognitive_weight: f64,
    pub social_weight: f64,
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    /// Neighbor step as a fraction of each dimension's range.
    pub step_size: f64,
    /// Iteration budget for particle swarm and simulated annealing.
    pub max_iterations: usize,
}

impl Default for AlgorithmParameters {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 100,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            tournament_size: 3,
            inertia_weight: 0.7,
            cognitive_weight: 1.5,
            social_weight: 1.5,
            initial_temperature: 1.0,
            cooling_rate: 0.95,
            step_size: 0.1,
            max_iterations: 1000,
        }
    }
}

/// `Σ coefficients[i] · x[i]` compared against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub coefficients: Vec<f64>,
    pub value: f64,
}

impl LinearConstraint {
    pub fn new(coefficients: Vec<f64>, value: f64) -> Self {
        Self { coefficients, value }
    }

    fn lhs(&self, params: &[f64]) -> f64 {
        self.coefficients.iter().zip(params).map(|(c, x)| c * x).sum()
    }
}

/// Box bounds plus linear equality (`= value`) and inequality (`≤ value`)
/// constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    #[serde(default)]
    pub equality: Vec<LinearConstraint>,
    #[serde(default)]
    pub inequality: Vec<LinearConstraint>,
    #[serde(default = "default_equality_tolerance")]
    pub equality_tolerance: f64,
}

fn default_equality_tolerance() -> f64 {
    1e-6
}

impl Constraints {
    pub fn bounds(min: Vec<f64>, max: Vec<f64>) -> Self {
        Self {
            min,
            max,
            equality: Vec::new(),
            inequality: Vec::new(),
            equality_tolerance: default_equality_tolerance(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    /// Whether `params` lies in the box and satisfies every linear constraint.
    pub fn check(&self, params: &[f64]) -> bool {
        if params.len() != self.dimensions() {
            return false;
        }
        let in_box = params
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .all(|(x, (lo, hi))| x.is_finite() && *x >= *lo && *x <= *hi);
        in_box
            && self
                .equality
                .iter()
                .all(|c| (c.lhs(params) - c.value).abs() <= self.equality_tolerance)
            && self.inequality.iter().all(|c| c.lhs(params) <= c.value)
    }

    /// Project each coordinate into its bounds.
    pub fn clamp(&self, params: &mut [f64]) {
        for (x, (lo, hi)) in params.iter_mut().zip(self.min.iter().zip(&self.max)) {
            *x = x.clamp(*lo, *hi);
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| sample_range(rng, *lo, *hi))
            .collect()
    }

    fn validate(&self) -> EngineResult<()> {
        let dims = self.dimensions();
        if dims == 0 {
            return Err(EngineError::Validation("constraints have no dimensions".into()));
        }
        if self.max.len() != dims {
            return Err(EngineError::Validation(format!(
                "min has {dims} bounds but max has {}",
                self.max.len()
            )));
        }
        for (i, (lo, hi)) in self.min.iter().zip(&self.max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(EngineError::Validation(format!(
                    "invalid bounds for dimension {i}: [{lo}, {hi}]"
                )));
            }
        }
        for c in self.equality.iter().chain(&self.inequality) {
            if c.coefficients.len() != dims {
                return Err(EngineError::Validation(format!(
                    "linear constraint has {} coefficients, expected {dims}",
                    c.coefficients.len()
                )));
            }
        }
        Ok(())
    }
}

/// Uniform sample from `[lo, hi]`; `lo` when the range is empty.
pub(crate) fn sample_range<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Minimize,
    Maximize,
}

impl Direction {
    /// Objective value → internal cost (always minimized).
    fn to_cost(self, value: f64) -> f64 {
        match self {
            Direction::Minimize => value,
            Direction::Maximize => -value,
        }
    }

    /// Internal cost → objective value.
    fn to_value(self, cost: f64) -> f64 {
        match self {
            Direction::Minimize => cost,
            Direction::Maximize => -cost,
        }
    }
}

/// Plateau detection: converged when the best value moved by no more than
/// `tolerance` over the last `window` iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub window: usize,
    pub tolerance: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window: 10,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub kind: OptimizerKind,
    #[serde(default)]
    pub parameters: AlgorithmParameters,
    pub constraints: Constraints,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizationConfig {
    pub fn new(kind: OptimizerKind, constraints: Constraints) -> Self {
        Self {
            kind,
            parameters: AlgorithmParameters::default(),
            constraints,
            direction: Direction::Minimize,
            convergence: ConvergenceConfig::default(),
            seed: None,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.kind == OptimizerKind::Bayesian {
            return Err(EngineError::Validation(
                "bayesian optimization is not supported".into(),
            ));
        }
        self.constraints.validate()?;

        let p = &self.parameters;
        let unit = |name: &str, v: f64| -> EngineResult<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EngineError::Validation(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        match self.kind {
            OptimizerKind::Genetic => {
                if p.population_size < 2 {
                    return Err(EngineError::Validation("population_size must be at least 2".into()));
                }
                if p.tournament_size == 0 {
                    return Err(EngineError::Validation("tournament_size must be at least 1".into()));
                }
                unit("mutation_rate", p.mutation_rate)?;
                unit("crossover_rate", p.crossover_rate)?;
            }
            OptimizerKind::ParticleSwarm => {
                if p.population_size == 0 {
                    return Err(EngineError::Validation("population_size must be at least 1".into()));
                }
            }
            OptimizerKind::SimulatedAnnealing => {
                if !(p.cooling_rate > 0.0 && p.cooling_rate < 1.0) {
                    return Err(EngineError::Validation("cooling_rate must be within (0, 1)".into()));
                }
                if !(p.initial_temperature > 0.0) {
                    return Err(EngineError::Validation("initial_temperature must be positive".into()));
                }
            }
            OptimizerKind::Bayesian => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

/// Function being optimized. Errors abort the run.
#[async_trait]
pub trait Objective: Send + Sync {
    async fn evaluate(&self, params: &[f64]) -> anyhow::Result<f64>;
}

/// Adapter for plain synchronous closures.
pub struct FnObjective<F>(pub F);

#[async_trait]
impl<F> Objective for FnObjective<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    async fn evaluate(&self, params: &[f64]) -> anyhow::Result<f64> {
        Ok((self.0)(params))
    }
}

/// Outcome of evaluating one candidate, in internal (minimized) cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Cost(f64),
    ConstraintViolated,
}

impl Evaluation {
    /// Ranking key; violations sort after every real cost.
    pub fn fitness(&self) -> f64 {
        match self {
            Evaluation::Cost(c) => *c,
            Evaluation::ConstraintViolated => VIOLATION_FITNESS,
        }
    }

    pub fn is_feasible(&self) -> bool {
        matches!(self, Evaluation::Cost(_))
    }
}

// ---------------------------------------------------------------------------
// Results and progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    /// Best objective value found up to and including this iteration.
    pub best_value: f64,
    pub parameters: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub iterations: usize,
    pub evaluations: usize,
    pub time_elapsed_ms: u64,
    pub convergence: bool,
    pub cancelled: bool,
    pub strategy: OptimizerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_parameters: Vec<f64>,
    /// Objective value of `best_parameters`, in the caller's direction.
    pub best_value: f64,
    pub history: Vec<HistoryEntry>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub strategy: OptimizerKind,
    pub iteration: usize,
    pub best_value: Option<f64>,
    pub evaluations: usize,
}

// ---------------------------------------------------------------------------
// Search context
// ---------------------------------------------------------------------------

/// Per-run state shared by every strategy.
pub struct SearchContext<'a> {
    pub config: &'a OptimizationConfig,
    objective: &'a dyn Objective,
    cancel: &'a CancellationToken,
    progress: Option<UnboundedSender<ProgressEvent>>,
    pub rng: StdRng,
    best_parameters: Option<Vec<f64>>,
    best_cost: f64,
    history: Vec<HistoryEntry>,
    evaluations: usize,
    iterations: usize,
    converged: bool,
    cancelled: bool,
    started: Instant,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        config: &'a OptimizationConfig,
        objective: &'a dyn Objective,
        cancel: &'a CancellationToken,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            objective,
            cancel,
            progress,
            rng,
            best_parameters: None,
            best_cost: f64::INFINITY,
            history: Vec::new(),
            evaluations: 0,
            iterations: 0,
            converged: false,
            cancelled: false,
            started: Instant::now(),
        }
    }

    pub fn constraints(&self) -> &'a Constraints {
        &self.config.constraints
    }

    pub fn parameters(&self) -> &'a AlgorithmParameters {
        &self.config.parameters
    }

    pub fn check_constraints(&self, params: &[f64]) -> bool {
        self.config.constraints.check(params)
    }

    /// Uniform random point in the box.
    pub fn sample(&mut self) -> Vec<f64> {
        self.config.constraints.sample(&mut self.rng)
    }

    /// Check the cancellation signal, latching it into the result metadata.
    pub fn should_stop(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            if !self.cancelled {
                info!(iteration = self.iterations, "Optimization cancelled");
            }
            self.cancelled = true;
        }
        self.cancelled
    }

    pub async fn evaluate(&mut self, params: &[f64]) -> EngineResult<Evaluation> {
        if self.check_constraints(params) {
            self.evaluations += 1;
        }
        evaluate_one(self.objective, self.config, params).await
    }

    /// Evaluate a batch concurrently. Any objective error fails the batch.
    pub async fn evaluate_all(&mut self, candidates: &[Vec<f64>]) -> EngineResult<Vec<Evaluation>> {
        let objective = self.objective;
        let config = self.config;
        let evals = try_join_all(
            candidates
                .iter()
                .map(|c| evaluate_one(objective, config, c)),
        )
        .await?;
        self.evaluations += candidates
            .iter()
            .filter(|c| config.constraints.check(c))
            .count();
        Ok(evals)
    }

    /// Keep `params` if it beats the best so far. Violations never win.
    pub fn update_best(&mut self, params: &[f64], eval: Evaluation) -> bool {
        match eval {
            Evaluation::Cost(cost) if cost < self.best_cost => {
                self.best_cost = cost;
                self.best_parameters = Some(params.to_vec());
                true
            }
            _ => false,
        }
    }

    pub fn best_parameters(&self) -> Option<&[f64]> {
        self.best_parameters.as_deref()
    }

    /// Best objective value in the caller's direction.
    pub fn best_value(&self) -> Option<f64> {
        self.best_parameters
            .as_ref()
            .map(|_| self.config.direction.to_value(self.best_cost))
    }

    /// Close an iteration: append history, publish progress.
    pub fn finish_iteration(&mut self) {
        let iteration = self.iterations;
        self.iterations += 1;
        let best_value = self.best_value();
        if let (Some(value), Some(params)) = (best_value, &self.best_parameters) {
            self.history.push(HistoryEntry {
                iteration,
                best_value: value,
                parameters: params.clone(),
            });
        }
        debug!(
            strategy = %self.config.kind,
            iteration,
            best = ?best_value,
            evaluations = self.evaluations,
            "Optimization iteration complete"
        );
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent {
                strategy: self.config.kind,
                iteration,
                best_value,
                evaluations: self.evaluations,
            });
        }
    }

    /// Plateau check over the configured window; latches on success.
    pub fn check_convergence(&mut self) -> bool {
        let window = self.config.convergence.window;
        if window == 0 || self.history.len() <= window {
            return false;
        }
        let last = self.history[self.history.len() - 1].best_value;
        let earlier = self.history[self.history.len() - 1 - window].best_value;
        if (last - earlier).abs() <= self.config.convergence.tolerance {
            self.converged = true;
        }
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn into_result(self) -> EngineResult<OptimizationResult> {
        let best_value = self.best_value();
        let (Some(best_parameters), Some(best_value)) = (self.best_parameters, best_value) else {
            return Err(EngineError::Optimization(if self.cancelled {
                "cancelled before any feasible candidate was found".into()
            } else {
                "no feasible candidate found".into()
            }));
        };
        Ok(OptimizationResult {
            best_parameters,
            best_value,
            history: self.history,
            metadata: ResultMetadata {
                iterations: self.iterations,
                evaluations: self.evaluations,
                time_elapsed_ms: self.started.elapsed().as_millis() as u64,
                convergence: self.converged,
                cancelled: self.cancelled,
                strategy: self.config.kind,
            },
        })
    }
}

async fn evaluate_one(
    objective: &dyn Objective,
    config: &OptimizationConfig,
    params: &[f64],
) -> EngineResult<Evaluation> {
    if !config.constraints.check(params) {
        return Ok(Evaluation::ConstraintViolated);
    }
    let value = objective
        .evaluate(params)
        .await
        .map_err(|e| EngineError::Optimization(format!("objective failed: {e:#}")))?;
    if value.is_nan() {
        return Ok(Evaluation::ConstraintViolated);
    }
    Ok(Evaluation::Cost(config.direction.to_cost(value)))
}

// ---------------------------------------------------------------------------
// Strategies and engine
// ---------------------------------------------------------------------------

/// One search algorithm. Drives the context until its budget is spent,
/// convergence is reached, or cancellation is observed.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    async fn search(&self, ctx: &mut SearchContext<'_>) -> EngineResult<()>;
}

/// Stateless entry point; every call is an independent run.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationEngine;

impl OptimizationEngine {
    pub fn new() -> Self {
        Self
    }

    pub async fn optimize(
        &self,
        config: &OptimizationConfig,
        objective: &dyn Objective,
        cancel: &CancellationToken,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> EngineResult<OptimizationResult> {
        config.validate()?;

        let strategy: Box<dyn SearchStrategy> = match config.kind {
            OptimizerKind::Genetic => Box::new(genetic::GeneticAlgorithm),
            OptimizerKind::ParticleSwarm => Box::new(swarm::ParticleSwarm),
            OptimizerKind::SimulatedAnnealing => Box::new(annealing::SimulatedAnnealing),
            OptimizerKind::Bayesian => {
                return Err(EngineError::Validation(
                    "bayesian optimization is not supported".into(),
                ))
            }
        };

        info!(
            strategy = %config.kind,
            dimensions = config.constraints.dimensions(),
            direction = ?config.direction,
            "Optimization started"
        );

        let mut ctx = SearchContext::new(config, objective, cancel, progress);
        strategy.search(&mut ctx).await?;
        let result = ctx.into_result()?;

        info!(
            strategy = %config.kind,
            best_value = format!("{:.6}", result.best_value),
            iterations = result.metadata.iterations,
            evaluations = result.metadata.evaluations,
            converged = result.metadata.convergence,
            cancelled = result.metadata.cancelled,
            elapsed_ms = result.metadata.time_elapsed_ms,
            "Optimization finished"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
