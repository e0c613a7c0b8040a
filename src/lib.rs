pub mod acquire;
pub mod backend;
pub mod command;
pub mod context;
pub mod engine;
pub mod error;
pub mod flags;
pub mod logging;
pub mod options;
pub mod outcome;
pub mod platform;

// Re-exports for easy access
pub use acquire::{ImageAcquirer, ImagePair, PullMode};
pub use backend::{Backend, ContentStore, LayoutBackend, ResolvedImage};
pub use command::DiffArgs;
pub use context::Context;
pub use engine::{DiffEngine, DiffOutcome, LayerEngine, ReportNode};
pub use error::{Error, Result};
pub use options::{ComparisonConfig, OptionsBuilder};
pub use outcome::ExecutionOutcome;
