//! Mock models for integration testing.
//!
//! `ScriptedModel` answers from a fixed script keyed by `event_id`, with a
//! fallback output, a call counter and a switchable forced error. `MockModel`
//! is the mockall double for expectation-style tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use augur::ensemble::Predictor;
use augur::types::{Features, ModelOutput};

mock! {
    pub Model {}

    #[async_trait]
    impl Predictor for Model {
        async fn predict(&self, features: &Features) -> Result<ModelOutput>;
    }
}

/// A deterministic model for pipeline tests.
pub struct ScriptedModel {
    fallback: ModelOutput,
    script: HashMap<String, ModelOutput>,
    calls: AtomicUsize,
    /// If set, every call fails with this message.
    force_error: Mutex<Option<String>>,
}

impl ScriptedModel {
    /// Always answers `fallback`.
    pub fn constant(fallback: ModelOutput) -> Self {
        Self {
            fallback,
            script: HashMap::new(),
            calls: AtomicUsize::new(0),
            force_error: Mutex::new(None),
        }
    }

    /// Answer `output` for one event, `fallback` otherwise.
    pub fn with(mut self, event_id: &str, output: ModelOutput) -> Self {
        self.script.insert(event_id.to_string(), output);
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for ScriptedModel {
    async fn predict(&self, features: &Features) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        let output = features
            .get("event_id")
            .and_then(|v| v.as_str())
            .and_then(|id| self.script.get(id))
            .unwrap_or(&self.fallback);
        Ok(output.clone())
    }
}
