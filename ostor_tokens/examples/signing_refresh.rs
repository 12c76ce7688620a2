use clap::Parser;
use ostor_tokens::{
    sources, AccountId, AccountSecret, TokenLifetimeConfig, TokenManager, TokenStatus,
};
use std::time::Duration;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The identity service's token request URL
    #[arg(short, long, env)]
    token_url: reqwest::Url,

    /// The account identifier presented to the identity service
    #[arg(short, long, env)]
    account_id: String,

    /// The account secret used to authenticate the exchange
    #[arg(short = 's', long, env, hide_env_values = true)]
    account_secret: String,

    /// Fraction of the issued lifetime reserved for proactive refresh
    #[arg(short, long, env, default_value_t = 0.25)]
    refresh_offset: f64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let source = sources::StsTokenSource::new(
        client,
        opts.token_url,
        sources::sts::dto::AccountCredentials {
            account_id: AccountId::from(opts.account_id),
            account_secret: AccountSecret::from(opts.account_secret),
        },
        TokenLifetimeConfig::new(opts.refresh_offset),
    );

    let manager = TokenManager::new(source);

    let token = manager.get_token().await?;
    tracing::info!(
        refresh_at = token.refresh_at().0,
        expiry = token.expiry().0,
        "first token set"
    );

    // Stand-in for a signing layer: read the current token periodically and
    // watch the manager renew it in the background as it goes stale.
    loop {
        time::sleep(Duration::from_secs(30)).await;

        let token = manager.get_token().await?;
        tracing::info!(
            status = ?token.status(),
            expiry = token.expiry().0,
            has_bearer = token.bearer().is_some(),
            "current token set"
        );

        if matches!(token.status(), TokenStatus::Expired) {
            break Ok(());
        }
    }
}
