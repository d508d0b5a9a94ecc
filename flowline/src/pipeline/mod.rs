//! Pipeline declaration and execution.
//!
//! This module provides:
//! - The declarative [`Builder`] for accumulating stage definitions
//! - The [`Pipeline`] driver that wires stages together and runs the
//!   pull loop against an input sequence

mod builder;
mod driver;
mod integration_tests;

pub use builder::Builder;
pub use driver::{ErrorHandler, Pipeline};
