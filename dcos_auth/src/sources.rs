//! Token sources

use crate::Credential;
use async_trait::async_trait;
use std::error;

pub mod fixed;
#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "login")]
pub mod login;

pub use fixed::ConstTokenSource;
#[cfg(feature = "file")]
pub use file::FileTokenSource;
#[cfg(feature = "login")]
pub use login::LoginTokenSource;

/// An asynchronous source for credentials
///
/// Each call makes a single attempt to obtain a fresh credential. Retrying is
/// left to the caller.
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a credential fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a fresh credential from the source
    async fn request_token(&mut self) -> Result<Credential, Self::Error>;
}
