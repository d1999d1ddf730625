//! Voting strategies.
//!
//! Pure functions that collapse per-model `(prediction, confidence, weight)`
//! votes into a single prediction. Votes arrive in the ensemble's
//! configured model order, and every tie-break below relies on that order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EngineError, EngineResult, PredictionValue};

/// How an ensemble combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingStrategy {
    Weighted,
    Majority,
    Confidence,
}

impl fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotingStrategy::Weighted => write!(f, "weighted"),
            VotingStrategy::Majority => write!(f, "majority"),
            VotingStrategy::Confidence => write!(f, "confidence"),
        }
    }
}

impl std::str::FromStr for VotingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted" => Ok(VotingStrategy::Weighted),
            "majority" => Ok(VotingStrategy::Majority),
            "confidence" => Ok(VotingStrategy::Confidence),
            _ => Err(anyhow::anyhow!("Unknown voting strategy: {s}")),
        }
    }
}

/// One member's vote.
#[derive(Debug, Clone)]
pub struct Vote<'a> {
    pub prediction: &'a PredictionValue,
    pub confidence: f64,
    pub weight: f64,
}

/// Combined outcome of a vote.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    pub prediction: PredictionValue,
    pub confidence: f64,
}

/// Apply a strategy to an ordered list of votes.
pub fn combine(strategy: VotingStrategy, votes: &[Vote<'_>]) -> EngineResult<VoteOutcome> {
    if votes.is_empty() {
        return Err(EngineError::Validation("cannot combine an empty vote".into()));
    }
    Ok(match strategy {
        VotingStrategy::Weighted => weighted(votes),
        VotingStrategy::Majority => majority(votes),
        VotingStrategy::Confidence => confidence(votes),
    })
}

/// `prediction = Σ pred·w`, `confidence = Σ conf·w`.
///
/// Category votes cannot be summed, so a categorical ensemble picks the
/// label with the largest summed weight instead. Confidence is clamped to
/// [0, 1].
pub fn weighted(votes: &[Vote<'_>]) -> VoteOutcome {
    let confidence = votes
        .iter()
        .map(|v| v.confidence * v.weight)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    let numeric: Option<Vec<f64>> = votes.iter().map(|v| v.prediction.as_f64()).collect();
    let prediction = match numeric {
        Some(values) => PredictionValue::Numeric(
            values
                .iter()
                .zip(votes)
                .map(|(p, v)| p * v.weight)
                .sum(),
        ),
        None => {
            let tally = tally(votes, |v| v.weight);
            tally_winner(&tally)
        }
    };

    VoteOutcome {
        prediction,
        confidence,
    }
}

/// Mode of the predictions; confidence is the plain mean.
pub fn majority(votes: &[Vote<'_>]) -> VoteOutcome {
    let tally = tally(votes, |_| 1.0);
    let confidence = votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64;
    VoteOutcome {
        prediction: tally_winner(&tally),
        confidence,
    }
}

/// The single most confident vote wins.
pub fn confidence(votes: &[Vote<'_>]) -> VoteOutcome {
    let mut best = &votes[0];
    for v in &votes[1..] {
        if v.confidence > best.confidence {
            best = v;
        }
    }
    VoteOutcome {
        prediction: best.prediction.clone(),
        confidence: best.confidence,
    }
}

/// Distinct predictions in first-seen order with their accumulated score.
fn tally<'a>(votes: &[Vote<'a>], score: impl Fn(&Vote<'a>) -> f64) -> Vec<(&'a PredictionValue, f64)> {
    let mut tally: Vec<(&PredictionValue, f64)> = Vec::new();
    for v in votes {
        match tally.iter_mut().find(|(p, _)| *p == v.prediction) {
            Some(entry) => entry.1 += score(v),
            None => tally.push((v.prediction, score(v))),
        }
    }
    tally
}

/// Highest score; strict comparison keeps the first-seen entry on ties.
fn tally_winner(tally: &[(&PredictionValue, f64)]) -> PredictionValue {
    let mut best = &tally[0];
    for entry in &tally[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best.0.clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn votes<'a>(items: &'a [(PredictionValue, f64, f64)]) -> Vec<Vote<'a>> {
        items
            .iter()
            .map(|(p, c, w)| Vote {
                prediction: p,
                confidence: *c,
                weight: *w,
            })
            .collect()
    }

    #[test]
    fn test_weighted_numeric() {
        let items: [(PredictionValue, f64, f64); 2] = [(0.8.into(), 0.9, 0.6), (0.6.into(), 0.7, 0.4)];
        let out = weighted(&votes(&items));
        assert!((out.prediction.as_f64().unwrap() - 0.72).abs() < 1e-12);
        assert!((out.confidence - 0.82).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_confidence_stays_in_unit_range() {
        let items: [(PredictionValue, f64, f64); 2] = [("home".into(), 1.0, 0.50005), ("home".into(), 1.0, 0.5)];
        let out = weighted(&votes(&items));
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn test_weighted_categorical_uses_summed_weight() {
        let items: [(PredictionValue, f64, f64); 3] = [
            ("home".into(), 0.6, 0.3),
            ("away".into(), 0.9, 0.45),
            ("home".into(), 0.7, 0.25),
        ];
        let out = weighted(&votes(&items));
        // home = 0.55, away = 0.45
        assert_eq!(out.prediction, PredictionValue::Category("home".into()));
    }

    #[test]
    fn test_majority_mode() {
        let items: [(PredictionValue, f64, f64); 3] = [
            ("draw".into(), 0.5, 0.2),
            ("away".into(), 0.7, 0.4),
            ("away".into(), 0.6, 0.4),
        ];
        let out = majority(&votes(&items));
        assert_eq!(out.prediction, PredictionValue::Category("away".into()));
        assert!((out.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_majority_tie_resolves_to_first_model() {
        let items: [(PredictionValue, f64, f64); 4] = [
            ("away".into(), 0.5, 0.25),
            ("home".into(), 0.9, 0.25),
            ("home".into(), 0.9, 0.25),
            ("away".into(), 0.5, 0.25),
        ];
        let out = majority(&votes(&items));
        assert_eq!(out.prediction, PredictionValue::Category("away".into()));
    }

    #[test]
    fn test_confidence_picks_max() {
        let items: [(PredictionValue, f64, f64); 2] = [(0.3.into(), 0.55, 0.5), (0.9.into(), 0.95, 0.5)];
        let out = confidence(&votes(&items));
        assert_eq!(out.prediction, PredictionValue::Numeric(0.9));
        assert_eq!(out.confidence, 0.95);
    }

    #[test]
    fn test_confidence_tie_resolves_to_first_model() {
        let items: [(PredictionValue, f64, f64); 2] = [(0.1.into(), 0.8, 0.5), (0.2.into(), 0.8, 0.5)];
        let out = confidence(&votes(&items));
        assert_eq!(out.prediction, PredictionValue::Numeric(0.1));
    }

    #[test]
    fn test_combine_empty_is_error() {
        assert!(matches!(
            combine(VotingStrategy::Weighted, &[]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("Majority".parse::<VotingStrategy>().unwrap(), VotingStrategy::Majority);
        assert!("ranked".parse::<VotingStrategy>().is_err());
        assert_eq!(VotingStrategy::Confidence.to_string(), "confidence");
        let json = serde_json::to_string(&VotingStrategy::Weighted).unwrap();
        assert_eq!(json, "\"weighted\"");
    }
}
