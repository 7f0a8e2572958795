pub mod aggregator;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod util;

pub use aggregator::DayAggregator;
pub use cli::run_cli;
pub use codec::FilenameCodec;
pub use config::ViewerConfig;
pub use error::{Error, ParseError, Result};
pub use models::{CameraFileRecord, DayDate, DaySummary, Event, MediaKind};
pub use storage::{DirectoryStore, FsStore, MemoryStore};
