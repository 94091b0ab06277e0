pub mod config;
pub mod error;
pub mod fallback;
pub mod generation;
pub mod media;
pub mod object_store;
pub mod pipeline;
pub mod qr;
pub mod storage;
pub mod web;

pub use error::CartoonError;
pub use pipeline::{CartoonOutcome, CartoonPipeline, CartoonResponse, ResultBundle, StepOutcome};
