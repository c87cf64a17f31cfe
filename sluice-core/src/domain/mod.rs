//! Domain types shared across the orchestrator

pub mod event;
pub mod execution;
pub mod pipeline;
pub mod trigger;
