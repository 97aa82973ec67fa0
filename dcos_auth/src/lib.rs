//! Expiry-aware caching of short-lived tokens issued by a cluster identity backend
//!
//! Services running on the cluster authenticate outbound requests with a bearer
//! token obtained by logging a service account in to the identity backend.
//! Those tokens expire, and asking the backend for a new one on every request
//! would put it on the hot path of everything. A [`CachedTokenProvider`] sits
//! in front of any [`AsyncTokenSource`][sources::AsyncTokenSource] and hands out
//! the last credential it obtained until that credential comes within a
//! refresh margin (30 seconds by default) of its expiry. The next caller after
//! that point fetches a replacement.
//!
//! Nothing happens in the background: refreshes are driven by demand, each
//! call makes at most one request to the source, and a failed request is
//! reported to the caller that made it, leaving the previous credential in
//! place. Retrying is up to the caller.
//!
//! ```
//! use dcos_auth::{sources::ConstTokenSource, AccessToken, CachedTokenProvider};
//! use dcos_clock::DurationSecs;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = ConstTokenSource::never_expiring(AccessToken::from_static("token"));
//! let provider = CachedTokenProvider::new(source).with_refresh_margin(DurationSecs(60));
//!
//! let credential = provider.token().await.unwrap();
//! assert_eq!(credential.access_token().as_str(), "token");
//! # }
//! ```
//!
//! In a real deployment the source is usually a
//! [`LoginTokenSource`][sources::LoginTokenSource] pointed at the cluster's
//! login endpoint. Refer to the `cached_login` example for a complete setup.
//!
//! # Features
//!
//! The following features are supported by this crate:
//!
//! * `login` (default): Provides a token source that logs a service account in
//!   to the identity backend over HTTP.
//! * `file` (default): Provides a token source that reads a credential kept on
//!   the local filesystem by some other process.
//! * `rustls-tls`: Enables HTTPS for the login source.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
mod credential;
pub mod sources;

pub use braids::*;
pub use cache::{CachedTokenProvider, TokenCacheConfig, DEFAULT_REFRESH_MARGIN};
pub use credential::{Credential, CredentialStatus, TokenLifetimeConfig};
