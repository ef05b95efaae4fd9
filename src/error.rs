use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("repository discovery failed at {url}: {reason}")]
    Discovery { url: String, reason: String },
    #[error("could not bootstrap {repo_id}/{patch_id}: {reason}")]
    Bootstrap {
        repo_id: String,
        patch_id: String,
        reason: String,
    },
    #[error("could not parse patch archive {archive}: {reason}")]
    Parse { archive: String, reason: String },
    #[error("{context}: {path}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading response from {url} failed")]
    Read {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
}

impl EngineError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
