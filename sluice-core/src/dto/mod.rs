//! Data transfer objects for the management surface

pub mod pipeline;
pub mod trigger;
