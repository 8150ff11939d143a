//! Running planned steps.

pub mod executor;

pub use executor::{BatchContext, StepExecutor, StepReport, record_batch};
