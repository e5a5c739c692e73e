//! Measurement accumulation: collect processed spectra into one result
//! until a count target or a time budget is reached.

mod config;
mod driver;
mod engine;

pub use config::{AccumulationConfig, AccumulationMode};
pub use driver::Accumulator;
pub use engine::{
    AccumulationEngine, AccumulationResult, AccumulationState, EngineAction, SpectrumSnapshot,
};
