use std::{sync::Arc, time::Duration};

use clap::Parser;
use dcos_auth::{
    sources::login::{LoginTokenSource, ServiceAccountCredentials, LOGIN_PATH},
    CachedTokenProvider, CredentialStatus, ServiceAccountId, ServiceAccountPassword,
    TokenLifetimeConfig,
};
use dcos_clock::{Clock, DurationSecs, System};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The cluster URL hosting the identity backend
    #[arg(short = 'u', long, env)]
    cluster_url: reqwest::Url,

    /// The service account to log in as
    #[arg(short = 'i', long, env)]
    service_account: ServiceAccountId,

    /// The service account's password
    #[arg(short = 'p', long, env, hide_env_values = true)]
    service_account_password: ServiceAccountPassword,

    /// Seconds before expiry at which the cached token is refreshed
    #[arg(short = 'm', long, env, default_value_t = 30)]
    refresh_margin: u64,

    /// Seconds for which an issued token without an `exp` claim is assumed to be valid
    #[arg(short = 'l', long, env, default_value_t = 120)]
    token_lifetime: u64,

    /// Seconds between polls of the cache
    #[arg(long, env, default_value_t = 5)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let source = LoginTokenSource::new(
        client,
        opts.cluster_url.join(LOGIN_PATH)?,
        ServiceAccountCredentials {
            uid: opts.service_account,
            password: opts.service_account_password,
        },
        TokenLifetimeConfig::new(DurationSecs(opts.token_lifetime)),
    );

    let provider = Arc::new(
        CachedTokenProvider::new(source).with_refresh_margin(DurationSecs(opts.refresh_margin)),
    );

    let mut interval = time::interval(Duration::from_secs(opts.poll_interval));
    loop {
        interval.tick().await;

        let credential = match provider.token().await {
            Ok(credential) => credential,
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "unable to obtain token, will try again"
                );
                continue;
            }
        };

        let now = System.now();
        let status = credential.status_at(now, provider.refresh_margin());
        match status {
            CredentialStatus::Fresh => tracing::info!(
                ?status,
                token = format_args!("{:#?}", credential.access_token()),
                expiry = credential.expiry().0,
                until_refresh = credential
                    .until_refresh_at(now, provider.refresh_margin())
                    .0,
                "pulled token"
            ),
            CredentialStatus::Stale | CredentialStatus::Expired => tracing::warn!(
                ?status,
                expiry = credential.expiry().0,
                "pulled token that should already have been refreshed"
            ),
        }
    }
}
