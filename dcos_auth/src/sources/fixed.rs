//! A source that always hands out the same credential

use std::convert::Infallible;

use async_trait::async_trait;
use dcos_clock::UnixTime;

use super::AsyncTokenSource;
use crate::{AccessToken, Credential};

/// A token source that yields a fixed credential
#[derive(Clone, Debug)]
pub struct ConstTokenSource {
    credential: Credential,
}

impl ConstTokenSource {
    /// Constructs a source for a token that expires at `expires_at`
    pub fn new(access_token: impl Into<AccessToken>, expires_at: UnixTime) -> Self {
        Self {
            credential: Credential::new(access_token, expires_at),
        }
    }

    /// Constructs a source for a token that never expires
    pub fn never_expiring(access_token: impl Into<AccessToken>) -> Self {
        Self::new(access_token, UnixTime(u64::MAX))
    }
}

#[async_trait]
impl AsyncTokenSource for ConstTokenSource {
    type Error = Infallible;

    async fn request_token(&mut self) -> Result<Credential, Self::Error> {
        Ok(self.credential.clone())
    }
}
