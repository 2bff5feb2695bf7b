//! Command-line interface for mbsniff

pub mod args;

pub use args::{Args, FilterKind};
