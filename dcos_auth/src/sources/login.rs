//! A token source that logs a service account into the cluster identity backend

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dcos_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AsyncTokenSource;
use crate::{
    AccessToken, Credential, ServiceAccountId, ServiceAccountPassword, TokenLifetimeConfig,
};

/// Path of the login endpoint relative to the cluster URL
pub const LOGIN_PATH: &str = "/acs/api/v1/auth/login";

/// Credentials of a service account
#[derive(Debug, Serialize)]
pub struct ServiceAccountCredentials {
    /// The service account identifier
    pub uid: ServiceAccountId,

    /// The service account password
    pub password: ServiceAccountPassword,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: AccessToken,
}

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: Option<u64>,
}

/// Reads the `exp` claim from the payload of a JWT without verifying it
///
/// Returns `None` if the token is not a three-segment JWT or carries no
/// expiry claim.
fn claimed_expiry(token: &str) -> Option<UnixTime> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let payload = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&payload).ok()?;
    claim.exp.map(UnixTime)
}

/// A token source that obtains tokens by logging in to the identity backend
///
/// The expiry of an issued token is read from its `exp` claim. The token's
/// signature is not checked. If the token is not a JWT or has no `exp` claim,
/// the expiry is stamped from the configured [`TokenLifetimeConfig`] at the
/// moment the response arrives.
#[derive(Debug)]
pub struct LoginTokenSource<C = System> {
    client: reqwest::Client,
    login_url: reqwest::Url,
    credentials: ServiceAccountCredentials,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl<C> LoginTokenSource<C> {
    /// Constructs a new login source posting to `login_url`
    pub fn new(
        client: reqwest::Client,
        login_url: reqwest::Url,
        credentials: ServiceAccountCredentials,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            login_url,
            credentials,
            lifetime_config,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncTokenSource for LoginTokenSource<C> {
    type Error = TokenRequestError;

    async fn request_token(&mut self) -> Result<Credential, Self::Error> {
        request_token(
            &self.client,
            self.login_url.clone(),
            &self.credentials,
            &self.lifetime_config,
        )
        .await
    }
}

/// An error while attempting to log in to the identity backend
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The backend rejected the login
    #[error("error requesting token from identity backend: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the login response
    #[error("error deserializing login response from identity backend")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send the login request to the identity backend
    #[error("error sending request to identity backend")]
    RequestSend(reqwest::Error),
}

#[tracing::instrument(
    err,
    skip(client, login_url, credentials, lifetime_config),
    fields(
        login_url = %login_url,
        credentials.uid = %credentials.uid,
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    login_url: reqwest::Url,
    credentials: &ServiceAccountCredentials,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<Credential, TokenRequestError> {
    tracing::trace!("logging in to identity backend");

    let resp = client
        .post(login_url)
        .json(credentials)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received login response from identity backend"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: LoginResponse = serde_json::from_slice(&body)?;

    let credential = match claimed_expiry(resp.token.as_str()) {
        Some(expiry) => {
            tracing::info!(expiry = expiry.0, "received new token");
            Credential::new(resp.token, expiry)
        }
        None => {
            let credential = lifetime_config.create_credential(resp.token);
            tracing::info!(
                lifetime = lifetime_config.token_lifetime().0,
                expiry = credential.expiry().0,
                "received new token without expiry claim"
            );
            credential
        }
    };

    Ok(credential)
}
