use anyhow::{Context, Result};
use tracing::debug;

use taskweave_core::{load_dotenv, TaskSystemConfig};

/// Load the task system config from `path`, or from the environment
/// (after reading `.env`) when no path is given.
pub fn load(path: Option<&str>) -> Result<TaskSystemConfig> {
    match path {
        Some(p) => {
            debug!(path = p, "Loading config file");
            TaskSystemConfig::from_file(p)
                .with_context(|| format!("failed to load config: {}", p))
        }
        None => {
            load_dotenv();
            let config = TaskSystemConfig::from_env();
            config
                .validate()
                .context("invalid task system config in environment")?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "short_task_threads = 3\nsome_frame_tasks_per_frame = 2").unwrap();

        let config = load(file.path().to_str()).unwrap();
        assert_eq!(config.short_task_threads, 3);
        assert_eq!(config.some_frame_tasks_per_frame, 2);
        assert_eq!(config.file_access_threads, 1);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load(Some("/no/such/taskweave.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/no/such/taskweave.toml"));
    }
}
