pub mod aggregator;
pub mod clients;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod store;
pub mod utils;

pub use aggregator::{Aggregator, DependencyReport, aggregate};
pub use error::{PipelineError, Result};
pub use pipeline::{Coordinator, RunReport, Stage};

/// Load `CODING_ANALYSIS_ENV_FILE` if set, otherwise `.env` from the current directory or
/// its parents. Missing files are ignored. Variables already set are not overridden.
/// Call this once at startup, before tracing and config are initialized.
pub fn load_env() -> Option<std::path::PathBuf> {
    match std::env::var("CODING_ANALYSIS_ENV_FILE") {
        Ok(path) => {
            let path = std::path::PathBuf::from(path);
            dotenvy::from_path(&path).ok().map(|_| path)
        }
        Err(_) => dotenvy::dotenv().ok(),
    }
}
