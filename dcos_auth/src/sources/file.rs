//! A token source backed by a file on the local filesystem
//!
//! Useful when some other process (a sidecar or an init container) keeps a
//! current credential written to disk as JSON:
//!
//! ```json
//! {"token": "eyJhbGciOi...", "expires_at": 1700000000}
//! ```

use std::{io, path::PathBuf};

use async_trait::async_trait;

use super::AsyncTokenSource;
use crate::Credential;

/// A token source that reads a serialized credential from a local file
#[derive(Debug)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    /// Constructs a new file token source
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_credential(&self) -> Result<Credential, io::Error> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        let credential = serde_json::from_str(&data)?;
        Ok(credential)
    }
}

#[async_trait]
impl AsyncTokenSource for FileTokenSource {
    type Error = io::Error;

    async fn request_token(&mut self) -> Result<Credential, Self::Error> {
        tracing::trace!(path = %self.path.display(), "reading credential from file");
        self.read_credential().await
    }
}
