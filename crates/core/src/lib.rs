pub mod config;
pub mod error;
pub mod handle;

pub use config::{ExecutorKind, SchedulerConfig, load_dotenv};
pub use error::*;
pub use handle::{HandleGenerator, TaskHandle};
