//! Infrastructure layer
//!
//! Contains implementations for external systems: graph databases and
//! source-text services.

pub mod graph;
pub mod source;
