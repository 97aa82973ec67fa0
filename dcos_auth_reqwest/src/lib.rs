//! Middleware to attach cached credentials to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach a
//! current token from a shared [`CachedTokenProvider`] to each outbound
//! request. The provider is consulted per request, so a token nearing expiry
//! is refreshed by whichever request first notices it.
//!
//! If a request already has an `Authorization` header by the time that the
//! middleware executes, the existing value is left in place and the provider
//! is not consulted.
//!
//! ```
//! use std::sync::Arc;
//!
//! use dcos_auth::{sources::ConstTokenSource, AccessToken, CachedTokenProvider};
//! use dcos_auth_reqwest::AccessTokenMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let provider = Arc::new(CachedTokenProvider::new(ConstTokenSource::never_expiring(
//!     AccessToken::from_static("token"),
//! )));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(provider))
//!     .build();
//! # drop(client);
//! ```
//!
//! Which requests receive a token is controlled by a predicate, by default
//! [`HttpsOnly`]. Predicates compose, so a token can be limited to a
//! particular backend:
//!
//! ```
//! # use std::sync::Arc;
//! # use dcos_auth::{sources::ConstTokenSource, AccessToken, CachedTokenProvider};
//! use dcos_auth_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//! # let provider = Arc::new(CachedTokenProvider::new(ConstTokenSource::never_expiring(
//! #     AccessToken::from_static("token"),
//! # )));
//!
//! AccessTokenMiddleware::new(provider)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("leader.mesos")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error, fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use dcos_auth::{sources::AsyncTokenSource, CachedTokenProvider, Credential};
use dcos_clock::{Clock, System};
use predicates::{reflection, Predicate};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};

/// A middleware that injects a cached access token into outgoing requests
pub struct AccessTokenMiddleware<S, C = System, P = HttpsOnly> {
    provider: Arc<CachedTokenProvider<S, C>>,
    predicate: P,
}

impl<S, C> AccessTokenMiddleware<S, C, HttpsOnly> {
    /// Construct a new middleware from a shared token provider
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(provider: Arc<CachedTokenProvider<S, C>>) -> Self {
        Self {
            provider,
            predicate: HttpsOnly,
        }
    }
}

impl<S, C, P> AccessTokenMiddleware<S, C, P> {
    /// Replaces the predicate deciding which requests receive a token
    pub fn with_predicate<Q>(self, predicate: Q) -> AccessTokenMiddleware<S, C, Q> {
        AccessTokenMiddleware {
            provider: self.provider,
            predicate,
        }
    }
}

impl<S, C, P: Clone> Clone for AccessTokenMiddleware<S, C, P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            predicate: self.predicate.clone(),
        }
    }
}

impl<S, C, P> fmt::Debug for AccessTokenMiddleware<S, C, P>
where
    S: fmt::Debug,
    C: fmt::Debug,
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("provider", &self.provider)
            .field("predicate", &self.predicate)
            .finish()
    }
}

fn bearer_header(credential: &Credential) -> std::result::Result<header::HeaderValue, Error> {
    let token = credential.access_token().as_str();

    let mut header_value = BytesMut::with_capacity(token.len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_bytes());

    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
        .map_err(Error::middleware)?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<S, C, P> Middleware for AccessTokenMiddleware<S, C, P>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let credential = self.provider.token().await.map_err(|error| {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    url = %req.url(),
                    "unable to obtain access token for request"
                );
                Error::middleware(error)
            })?;

            tracing::trace!(
                token.expiry = credential.expiry().0,
                "attaching access token"
            );
            req.headers_mut()
                .insert(header::AUTHORIZATION, bearer_header(&credential)?);
        }

        next.run(req, extensions).await
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let result = self.eval(req);
        (result != expected).then(|| {
            reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                "scheme",
                req.url().scheme().to_owned(),
            ))
        })
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the given host
///
/// Host names are compared without regard to ASCII case.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url()
            .host_str()
            .map_or(false, |host| host.eq_ignore_ascii_case(&self.host))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let result = self.eval(req);
        (result != expected).then(|| {
            reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                "host",
                req.url().host_str().unwrap_or("<none>").to_owned(),
            ))
        })
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use dcos_auth::{sources::ConstTokenSource, AccessToken};
    use dcos_clock::DurationSecs;
    use predicates::prelude::*;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("identity backend unavailable")]
    struct Unavailable;

    /// Counts requests and fails every one of them
    #[derive(Debug, Default)]
    struct FailingSource {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncTokenSource for FailingSource {
        type Error = Unavailable;

        async fn request_token(&mut self) -> std::result::Result<Credential, Self::Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(Unavailable)
        }
    }

    fn prepare_middleware() -> AccessTokenMiddleware<ConstTokenSource> {
        let source =
            ConstTokenSource::never_expiring(AccessToken::from_static(TEST_TOKEN));

        AccessTokenMiddleware::new(Arc::new(CachedTokenProvider::new(source)))
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_https_request() {
            let middleware = prepare_middleware();
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_with_defaults_skips_plain_http_request() {
            let middleware = prepare_middleware();
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("http://example.com").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn repeated_requests_reuse_the_cached_token() {
            let fetches = Arc::new(AtomicUsize::new(0));
            let provider = Arc::new(CachedTokenProvider::new(CountingSource {
                fetches: Arc::clone(&fetches),
            }));
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(AccessTokenMiddleware::new(provider))
                .with_arc(auth_checker.clone())
                .build();

            for _ in 0..3 {
                client.get("https://example.com").send().await.unwrap();
            }

            assert_eq!(fetches.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn failure_to_obtain_token_fails_the_request() {
            let fetches = Arc::new(AtomicUsize::new(0));
            let provider = Arc::new(CachedTokenProvider::new(FailingSource {
                fetches: Arc::clone(&fetches),
            }));
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(AccessTokenMiddleware::new(provider))
                .with_arc(auth_checker.clone())
                .build();

            let error = client.get("https://example.com").send().await.unwrap_err();

            assert!(matches!(error, Error::Middleware(_)));
            assert!(!auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(fetches.load(Ordering::SeqCst), 1);
        }

        mod and_predicate_evaluates_to_attach {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let middleware = prepare_middleware().with_predicate(predicate::always());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("http://leader.mesos").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let middleware = prepare_middleware().with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }
    }

    mod when_request_has_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn existing_header_is_kept_and_provider_is_not_consulted() {
            let fetches = Arc::new(AtomicUsize::new(0));
            let provider = Arc::new(CachedTokenProvider::new(FailingSource {
                fetches: Arc::clone(&fetches),
            }));
            let auth_checker = Arc::new(AuthChecker::new("Bearer override"));

            let client = ClientBuilder::new(Client::default())
                .with(AccessTokenMiddleware::new(provider))
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com")
                .header(header::AUTHORIZATION, "Bearer override")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(fetches.load(Ordering::SeqCst), 0);
        }
    }

    /// Hands out the test token, valid for an hour, and counts requests
    #[derive(Debug)]
    struct CountingSource {
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncTokenSource for CountingSource {
        type Error = Unavailable;

        async fn request_token(&mut self) -> std::result::Result<Credential, Self::Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = System.now();
            Ok(Credential::new(
                AccessToken::from_static(TEST_TOKEN),
                now + DurationSecs(3_600),
            ))
        }
    }

    fn get(url: &str) -> Request {
        Request::new(reqwest::Method::GET, url.parse().unwrap())
    }

    fn product_names(case: &reflection::Case<'_>) -> Vec<String> {
        case.products().map(|p| p.name().to_owned()).collect()
    }

    mod https_only_predicate {
        use super::*;

        #[test]
        fn no_case_when_https_request_is_expected_to_match() {
            let result = dbg!(HttpsOnly.find_case(true, &get("https://leader.mesos")));
            assert!(result.is_none());
        }

        #[test]
        fn no_case_when_http_request_is_expected_not_to_match() {
            let result = dbg!(HttpsOnly.find_case(false, &get("http://leader.mesos")));
            assert!(result.is_none());
        }

        #[test]
        fn reports_scheme_when_http_request_is_expected_to_match() {
            let request = get("http://leader.mesos");
            let case = HttpsOnly
                .find_case(true, &request)
                .expect("mismatch should produce a case");

            assert!(!case.result());
            assert_eq!(product_names(&case), ["scheme"]);
        }
    }

    mod exact_host_match_predicate {
        use super::*;

        #[test]
        fn no_case_when_same_host_is_expected_to_match() {
            let predicate = ExactHostMatch::new("leader.mesos");
            let result = dbg!(predicate.find_case(true, &get("https://leader.mesos/acs")));
            assert!(result.is_none());
        }

        #[test]
        fn no_case_when_other_host_is_expected_not_to_match() {
            let predicate = ExactHostMatch::new("leader.mesos");
            let result = dbg!(predicate.find_case(false, &get("https://master.mesos")));
            assert!(result.is_none());
        }

        #[test]
        fn reports_host_when_same_host_is_expected_not_to_match() {
            let predicate = ExactHostMatch::new("leader.mesos");
            let request = get("https://Leader.Mesos");
            let case = predicate
                .find_case(false, &request)
                .expect("mismatch should produce a case");

            assert!(case.result());
            assert_eq!(product_names(&case), ["host"]);
        }

        #[test]
        fn host_comparison_ignores_case() {
            let req = get("https://Leader.Mesos/service/kafka");

            assert!(ExactHostMatch::new("leader.mesos").eval(&req));
            assert!(!ExactHostMatch::new("master.mesos").eval(&req));
            assert!(HttpsOnly.and(ExactHostMatch::new("leader.mesos")).eval(&req));
        }
    }
}
