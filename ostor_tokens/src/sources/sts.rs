//! A token source backed by the security token service of an object
//! storage deployment

use async_trait::async_trait;
use ostor_clock::Clock;
use thiserror::Error;

use super::{Grant, Retryability, TokenSource};
use crate::{TokenLifetimeConfig, TokenSet};

pub mod dto;

/// The default network-backed token source
///
/// Exchanges the configured account credentials (or a refresh handle) for a
/// short-lived token set by POSTing a grant document to the token endpoint.
#[derive(Debug)]
pub struct StsTokenSource<C = ostor_clock::System> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::AccountCredentials,
    lifetime_config: TokenLifetimeConfig<C>,
}

impl<C> StsTokenSource<C> {
    /// Constructs a new token source
    ///
    /// The `reqwest::Client` is shared, so connection pooling and TLS
    /// configuration remain the caller's concern.
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::AccountCredentials,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            lifetime_config,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenSource for StsTokenSource<C> {
    type Error = TokenExchangeError;

    async fn fetch(&self, grant: Grant<'_>) -> Result<TokenSet, Self::Error> {
        request_token(
            &self.client,
            self.token_url.clone(),
            &self.credentials,
            grant,
            &self.lifetime_config,
        )
        .await
    }
}

/// An error while attempting to obtain a new token set from the identity
/// service
#[derive(Debug, Error)]
pub enum TokenExchangeError {
    /// Unable to send the token request to the identity service
    #[error("error sending token request to the identity service")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to read the response body
    #[error("error reading token response body")]
    BodyRead(#[source] reqwest::Error),
    /// The identity service responded with a non-success status
    #[error("identity service rejected the token request with status {status}: {body}")]
    Status {
        /// The response status code
        status: reqwest::StatusCode,
        /// The response body, for diagnostics
        body: String,
    },
    /// Unable to deserialize the token response body
    #[error("error deserializing token response from the identity service")]
    MalformedResponse(#[from] serde_json::Error),
    /// A response was received but contained no usable credential value
    ///
    /// Treated as an issuer or configuration bug rather than a transient
    /// condition.
    #[error("token response did not contain a usable credential")]
    EmptyToken,
}

impl Retryability for TokenExchangeError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RequestSend(_) | Self::BodyRead(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            Self::MalformedResponse(_) | Self::EmptyToken => false,
        }
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, grant, lifetime_config),
    fields(
        token_url = %token_url,
        grant_type = grant.grant_type(),
        account_id = %credentials.account_id,
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    credentials: &dto::AccountCredentials,
    grant: Grant<'_>,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<TokenSet, TokenExchangeError> {
    tracing::trace!("requesting token set from the identity service");

    let req = client.post(token_url);
    let req = match grant {
        Grant::Exchange => req.json(&dto::SecretExchangeGrant { credentials }),
        Grant::Refresh(handle) => req.json(&dto::RefreshGrant {
            refresh_handle: handle,
        }),
    };

    let resp = req.send().await.map_err(TokenExchangeError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from the identity service"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(TokenExchangeError::BodyRead)?;
        return Err(TokenExchangeError::Status { status, body });
    }

    let body = resp.bytes().await.map_err(TokenExchangeError::BodyRead)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    let token = lifetime_config.create_token(
        resp.access_token.map(|t| t.to_owned()),
        resp.delegation_token.map(|t| t.to_owned()),
        resp.identity_token.map(|t| t.to_owned()),
        resp.refresh_handle.map(|t| t.to_owned()),
        resp.expires_in,
    );

    if token.bearer().is_none() {
        return Err(TokenExchangeError::EmptyToken);
    }

    tracing::info!(
        has_delegation_token = token.delegation().is_some(),
        has_identity_token = token.identity().is_some(),
        has_refresh_handle = token.refresh_handle().is_some(),
        lifetime = token.lifetime().0,
        refresh_at = token.refresh_at().0,
        expiry = token.expiry().0,
        "received new token set"
    );

    Ok(token)
}
