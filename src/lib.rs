pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod discover;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod shutdown;
pub mod store;
pub mod types;

pub use config::Opts;
pub use error::{PipelineError, ProcessError};
pub use pipeline::{Pipeline, PipelineBuilder, RunReport};
pub use store::ResultStore;
pub use types::{BBox, EmbeddingDtype, FaceRecord, ItemId, ItemResult, ResultMap};
