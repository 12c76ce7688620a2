//! Token sources

use crate::{RefreshHandleRef, TokenSet};
use async_trait::async_trait;
use std::error;

#[cfg(feature = "sts")]
pub mod sts;

#[cfg(feature = "sts")]
pub use sts::{StsTokenSource, TokenExchangeError};

/// The credential material presented to the identity service when
/// requesting a new token set
#[derive(Clone, Copy, Debug)]
pub enum Grant<'a> {
    /// Exchange the source's long-lived secret for a fresh token set
    Exchange,
    /// Redeem a refresh handle obtained from a prior exchange
    Refresh(&'a RefreshHandleRef),
}

impl Grant<'_> {
    /// The grant type identifier used on the wire and in diagnostics
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::Exchange => "secret_exchange",
            Grant::Refresh(_) => "refresh",
        }
    }
}

/// Classifies fetch failures for retry purposes
///
/// The manager retries retryable failures up to its configured attempt
/// bound and fails fast on everything else.
pub trait Retryability {
    /// Whether the failed fetch may be retried
    fn is_retryable(&self) -> bool;
}

/// An asynchronous source of token sets
///
/// The default implementation is [`StsTokenSource`], which exchanges
/// credentials against a security token service over HTTP. Alternate
/// identity backends implement this trait and plug into the manager
/// unchanged.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token set fails
    type Error: error::Error + Retryability + Send + Sync + 'static;

    /// Requests a new token set using the provided grant
    async fn fetch(&self, grant: Grant<'_>) -> Result<TokenSet, Self::Error>;
}
