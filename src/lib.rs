pub mod artifacts;
pub mod boosting;
pub mod config;
pub mod encoder;
pub mod error;
pub mod estimator;
pub mod forest;
pub mod linear;
pub mod metrics;
pub mod pipeline;
pub mod sample_gen;
pub mod selector;
pub mod training;
pub mod tree;

pub use error::{TrainError, TrainResult};
