//! Expiry-aware caching in front of a token source

use std::{error, fmt, sync::Arc};

use dcos_clock::{Clock, DurationSecs, System};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{sources::AsyncTokenSource, Credential, CredentialStatus};

/// How long before expiry a cached credential stops being served
pub const DEFAULT_REFRESH_MARGIN: DurationSecs = DurationSecs(30);

/// Deserializable settings for a [`CachedTokenProvider`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Seconds before expiry at which a credential is refreshed
    pub refresh_margin: DurationSecs,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }
}

struct Slot<S> {
    source: S,
    credential: Option<Arc<Credential>>,
}

/// A token source decorator that holds on to the most recent credential
///
/// [`token()`][Self::token()] hands out the cached credential while it is
/// more than the refresh margin away from expiry. Otherwise it fetches a new
/// one from the wrapped source and replaces the cached credential.
///
/// Freshness checks share a read lock, so any number of callers can be
/// served concurrently. A refresh holds the write lock for the whole upstream
/// request: refreshes are serialized, and callers arriving meanwhile wait.
///
/// Callers that all saw a stale credential before the first of them took the
/// write lock will each make their own request, one after the other, with the
/// last successful response left in the cache. A refresh does not re-check
/// whether the credential was already replaced while it waited.
pub struct CachedTokenProvider<S, C = System> {
    slot: RwLock<Slot<S>>,
    refresh_margin: DurationSecs,
    clock: C,
}

impl<S> CachedTokenProvider<S, System> {
    /// Constructs an empty cache in front of `source`
    pub fn new(source: S) -> Self {
        Self {
            slot: RwLock::new(Slot {
                source,
                credential: None,
            }),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            clock: System,
        }
    }
}

impl<S, C> CachedTokenProvider<S, C> {
    /// Sets how long before expiry a cached credential is refreshed
    pub fn with_refresh_margin(mut self, refresh_margin: DurationSecs) -> Self {
        self.refresh_margin = refresh_margin;
        self
    }

    /// Applies deserialized settings
    pub fn with_config(self, config: TokenCacheConfig) -> Self {
        self.with_refresh_margin(config.refresh_margin)
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CachedTokenProvider<S, D> {
        CachedTokenProvider {
            slot: self.slot,
            refresh_margin: self.refresh_margin,
            clock,
        }
    }

    /// Gets the configured refresh margin
    #[inline]
    pub fn refresh_margin(&self) -> DurationSecs {
        self.refresh_margin
    }

    /// Gets the cached credential, if any, without contacting the source
    pub async fn cached(&self) -> Option<Arc<Credential>> {
        self.slot.read().await.credential.clone()
    }
}

impl<S, C: Clock> CachedTokenProvider<S, C> {
    /// Gets the status of the cached credential, if any
    pub async fn status(&self) -> Option<CredentialStatus> {
        let now = self.clock.now();
        self.slot
            .read()
            .await
            .credential
            .as_ref()
            .map(|c| c.status_at(now, self.refresh_margin))
    }

    async fn fresh_credential(&self) -> Option<Arc<Credential>> {
        let slot = self.slot.read().await;
        let credential = slot.credential.as_ref()?;
        let now = self.clock.now();

        if credential.is_fresh_at(now, self.refresh_margin) {
            tracing::trace!(
                expiry = credential.expiry().0,
                until_refresh = credential.until_refresh_at(now, self.refresh_margin).0,
                "serving cached credential"
            );
            Some(Arc::clone(credential))
        } else {
            tracing::debug!(
                now = now.0,
                refresh_at = credential.refresh_at(self.refresh_margin).0,
                expiry = credential.expiry().0,
                "cached credential is stale"
            );
            None
        }
    }
}

impl<S, C> CachedTokenProvider<S, C>
where
    S: AsyncTokenSource,
    C: Clock,
{
    /// Gets a credential that is not within the refresh margin of its expiry
    ///
    /// Makes at most one request to the source. If that request fails, the
    /// error is returned as-is and the cached credential is left untouched.
    pub async fn token(&self) -> Result<Arc<Credential>, S::Error> {
        if let Some(credential) = self.fresh_credential().await {
            return Ok(credential);
        }

        self.refresh().await
    }

    async fn refresh(&self) -> Result<Arc<Credential>, S::Error> {
        let mut slot = self.slot.write().await;

        tracing::debug!("requesting new credential");
        match slot.source.request_token().await {
            Ok(credential) => {
                let credential = Arc::new(credential);
                slot.credential = Some(Arc::clone(&credential));

                tracing::debug!(
                    expiry = credential.expiry().0,
                    refresh_at = credential.refresh_at(self.refresh_margin).0,
                    "cached new credential"
                );
                Ok(credential)
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "error requesting credential, keeping previous"
                );
                Err(error)
            }
        }
    }
}

impl<S, C> fmt::Debug for CachedTokenProvider<S, C>
where
    S: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("CachedTokenProvider");
        match self.slot.try_read() {
            Ok(slot) => s
                .field("source", &slot.source)
                .field("credential", &slot.credential),
            Err(_) => s.field("slot", &format_args!("<refreshing>")),
        };
        s.field("refresh_margin", &self.refresh_margin)
            .field("clock", &self.clock)
            .finish()
    }
}
