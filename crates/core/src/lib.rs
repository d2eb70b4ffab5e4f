pub mod config;
pub mod error;
pub mod trigger;

pub use config::{SchedulerKind, SchedulerPolicy, load_dotenv};
pub use error::*;
pub use trigger::*;
