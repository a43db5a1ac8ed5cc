pub mod decoder;
pub mod dsp;
pub mod engine;
pub mod processor;
pub mod stretcher;
pub mod types;
