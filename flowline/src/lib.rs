//! # Flowline
//!
//! A streaming pipeline engine: independently written processing steps
//! composed into one ordered chain that consumes an input sequence and
//! produces an output sequence, one record at a time.
//!
//! Flowline provides:
//!
//! - **Composable stages**: filter, transform, peek, take-while, gather,
//!   and scatter, declared in order through a builder
//! - **Bounded memory**: records are pulled through the chain on demand;
//!   the full record set is never materialized
//! - **Error isolation**: a stage body failing on one record skips that
//!   record and the run continues
//! - **Lifecycle hooks**: per-stage start/finish hooks for stages that
//!   hold expensive resources
//!
//! ## Quick Start
//!
//! ```
//! use flowline::prelude::*;
//!
//! let mut pipeline = Pipeline::setup(|b| {
//!     b.non_blank()          // drop empty records
//!         .upcase()          // transform the rest
//! })
//! .unwrap();
//!
//! let words = ["this", "", "is", "the", "story"].map(String::from);
//! let mut out = Vec::new();
//! pipeline
//!     .run(words, |item| out.extend(item.into_records()))
//!     .unwrap();
//! assert_eq!(out, vec!["THIS", "IS", "THE", "STORY"]);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errors;
pub mod item;
pub mod pipeline;
pub mod report;
pub mod stages;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::PipelineError;
    pub use crate::item::{Blank, Item};
    pub use crate::pipeline::{Builder, ErrorHandler, Pipeline};
    pub use crate::report::RunReport;
    pub use crate::stages::{Source, Stage};
}
