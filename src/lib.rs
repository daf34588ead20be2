//! Prompt-to-program pipeline: ask a model for Python, save it, run it, and
//! collect what it printed or plotted.

pub mod collect;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod sandbox;
pub mod store;
pub mod synth;

pub use error::{ErrorKind, PipelineError};
pub use pipeline::{Outcome, Pipeline, Progress, Report, Stage, TaskRequest};
