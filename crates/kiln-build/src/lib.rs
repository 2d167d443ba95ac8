//! Asset build pipeline for kiln sites.
//!
//! Stages source assets into an output tree, then bundles, minifies and
//! resizes them in place through a fixed sequence of steps per asset kind.

pub mod assets;
pub mod bundle;
pub mod config;
pub mod error;
pub mod glob;
pub mod html;
pub mod images;
pub mod kind;
pub mod stage;
pub mod tasks;
pub mod tools;

pub use config::{ConfigError, SiteConfig};
pub use error::BuildError;
pub use glob::{GlobError, GlobSet};
pub use kind::{CleanTarget, Kind};
pub use tasks::{BuildTask, Pipeline, RunReport, Step, StepReport};
pub use tools::{CommandToolchain, ToolCommand, ToolError, Toolchain};
