//! Sluice Core
//!
//! Core types and abstractions for the Sluice data-pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Step, Execution, Trigger, ...)
//! - DTOs: Data transfer objects for the management and firing surfaces

pub mod domain;
pub mod dto;
