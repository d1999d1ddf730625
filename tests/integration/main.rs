//! Integration test target: the full pipeline against mock and replayed
//! models.

mod mock_models;
mod pipeline;
mod simulation;
