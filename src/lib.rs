#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::perf, clippy::suspicious)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Advice resolution and weaving engine.
//!
//! Aspects request advice through an [`advice::AdviceFactory`]; the factory
//! resolves templates against an immutable [`model::DeclarationSnapshot`],
//! checks introductions for conflicts, and records diagnostics. The
//! [`pipeline::WeavingStage`] runs many aspect instances over one snapshot and
//! [`transform::TransformationSet`] lowers the collected advice into ordered
//! per-target transformations.

pub mod advice;
pub mod aspect;
pub mod cli;
pub mod config;
pub mod conflicts;
pub mod contracts;
pub mod diagnostics;
pub mod error;
pub mod generic_context;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod script;
pub mod templates;
pub mod transform;

pub use aspect::{Aspect, AspectInstance};
pub use error::{Error, Result};
