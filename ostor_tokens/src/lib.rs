//! Bearer token lifecycle management for the ostor object storage SDK
//!
//! The signing layer needs a currently-valid bearer credential for every
//! outbound request, but paying an identity-service round trip per request
//! is unacceptable. This crate provides the token cache and refresh engine
//! that sits between the two: a [`TokenManager`] holds the most recently
//! issued token set, decides when it has gone stale, and renews it — in the
//! background while the cached set is still usable, or synchronously once
//! it is not.
//!
//! The manager is deliberately conservative about when anyone waits:
//!
//! * Reads against a fresh cached token set return immediately.
//! * Reads inside the refresh window return the cached (still valid) set
//!   immediately while a single background task redeems the refresh handle.
//! * Only a cold start, a forced eviction, or true expiry makes a caller
//!   wait for the exchange, and concurrent callers in those states coalesce
//!   onto one request.
//!
//! Token sets come from a [`sources::TokenSource`]. The provided
//! [`sources::StsTokenSource`] exchanges account credentials against a
//! security token service over HTTP; alternative identity backends plug in
//! by implementing the trait.
//!
//! # Setting up a manager
//!
//! ```no_run
//! use ostor_tokens::{sources, AccountId, AccountSecret, TokenLifetimeConfig, TokenManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = sources::StsTokenSource::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://sts.example.com/token")?,
//!     sources::sts::dto::AccountCredentials {
//!         account_id: AccountId::from_static("my-account"),
//!         account_secret: AccountSecret::from_static("my-secret"),
//!     },
//!     TokenLifetimeConfig::default(),
//! );
//!
//! let manager = TokenManager::new(source);
//! # let _ = manager;
//! # Ok(())
//! # }
//! ```
//!
//! The signing layer then calls `manager.get_token().await?` per request and
//! presents [`TokenSet::bearer`] as the credential. See the
//! `signing_refresh` example for an end-to-end loop.
//!
//! # Features
//!
//! * `sts` (default): provides the HTTP-backed [`sources::StsTokenSource`].

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

pub mod backoff;
mod braids;
mod manager;
pub mod sources;
mod tokens;

pub use braids::*;
pub use manager::TokenManager;
pub use tokens::{TokenLifetimeConfig, TokenSet, TokenStatus};
