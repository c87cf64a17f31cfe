//! Sluice Engine
//!
//! The orchestration core: DAG validation, dependency-ordered
//! asynchronous execution, and the trigger subsystem (registry, firing
//! engine, cron driver, chain and dataset-polling integrators).
//!
//! Step payload execution, dataset DDL/DML and persistence are
//! collaborator traits ([`executor::StepExecutor`],
//! [`executor::DatasetCatalog`], [`store::Store`]); the engine is
//! agnostic to how that work is actually done.

pub mod dag;
pub mod error;
pub mod events;
pub mod execution;
pub mod executor;
pub mod hooks;
pub mod pipeline;
pub mod scheduler;
pub mod secrets;
pub mod store;
pub mod trigger;
