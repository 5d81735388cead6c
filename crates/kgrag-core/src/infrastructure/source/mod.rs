//! Source-text backends

mod wikipedia;

pub use wikipedia::WikipediaSource;
