use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading the extracted document. All of these are raised
/// before any line is parsed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid page dump {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
