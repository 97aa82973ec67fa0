use dcos_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef};

/// A token issued by the identity backend along with the time it expires
///
/// The token value is opaque; nothing here inspects or decodes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token")]
    access_token: AccessToken,
    expires_at: UnixTime,
}

/// A credential's lifecycle status relative to a refresh margin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The credential can be handed out as-is
    Fresh,
    /// The credential is still valid at the issuer, but is within the refresh
    /// margin and should be replaced
    Stale,
    /// The credential is no longer valid
    Expired,
}

impl Credential {
    /// Constructs a credential that expires at the given time
    pub fn new(access_token: impl Into<AccessToken>, expires_at: UnixTime) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the time that the credential will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expires_at
    }

    /// Gets the time from which the credential should be refreshed
    #[inline]
    pub fn refresh_at(&self, margin: DurationSecs) -> UnixTime {
        self.expires_at - margin
    }

    /// Whether the credential may still be served at `time`
    #[inline]
    pub fn is_fresh_at(&self, time: UnixTime, margin: DurationSecs) -> bool {
        time < self.refresh_at(margin)
    }

    /// Gets the credential's lifetime status as of the provided time
    pub fn status_at(&self, time: UnixTime, margin: DurationSecs) -> CredentialStatus {
        if self.is_fresh_at(time, margin) {
            CredentialStatus::Fresh
        } else if time < self.expires_at {
            CredentialStatus::Stale
        } else {
            CredentialStatus::Expired
        }
    }

    /// Gets a duration for how much longer the credential would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expires_at - time
    }

    /// Gets a duration for how much longer the credential would be served from a
    /// cache as of the provided time
    #[inline]
    pub fn until_refresh_at(&self, time: UnixTime, margin: DurationSecs) -> DurationSecs {
        self.refresh_at(margin) - time
    }
}

/// Configuration for stamping an expiry onto tokens whose lifetime is not
/// reported by the issuer
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    token_lifetime: DurationSecs,
    clock: C,
}

impl TokenLifetimeConfig {
    /// The identity backend's default token lifetime, five days
    pub const DEFAULT_TOKEN_LIFETIME: DurationSecs = DurationSecs(5 * 24 * 60 * 60);

    /// Constructs a lifetime configuration measured against the system clock
    pub fn new(token_lifetime: DurationSecs) -> Self {
        Self {
            token_lifetime,
            clock: System,
        }
    }
}

impl Default for TokenLifetimeConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOKEN_LIFETIME)
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            token_lifetime: self.token_lifetime,
            clock,
        }
    }

    /// Gets the configured token lifetime
    #[inline]
    pub fn token_lifetime(&self) -> DurationSecs {
        self.token_lifetime
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Wraps a just-issued access token into a credential
    pub fn create_credential(&self, access_token: impl Into<AccessToken>) -> Credential {
        Credential::new(access_token, self.clock.now() + self.token_lifetime)
    }
}
