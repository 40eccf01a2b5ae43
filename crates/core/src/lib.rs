pub mod config;
pub mod error;

pub use config::{load_dotenv, TaskSystemConfig};
pub use error::ConfigError;
