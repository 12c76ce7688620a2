use ostor_clock::{Clock, DurationSecs, System, UnixTime};

use super::{
    AccessToken, AccessTokenRef, DelegationToken, DelegationTokenRef, IdentityToken,
    IdentityTokenRef, RefreshHandle, RefreshHandleRef,
};

/// A set of credentials as issued by the identity service, with locally
/// computed scheduling information
///
/// A token set is immutable once built. The manager publishes a new set by
/// swapping the shared reference, never by mutating one in place.
#[derive(Debug)]
pub struct TokenSet {
    access: Option<Box<AccessTokenRef>>,
    delegation: Option<Box<DelegationTokenRef>>,
    identity: Option<Box<IdentityTokenRef>>,
    refresh_handle: Option<Box<RefreshHandleRef>>,
    lifetime: DurationSecs,
    issued: UnixTime,
    refresh_at: UnixTime,
    expiry: UnixTime,
}

/// A token set's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and does not yet warrant a refresh
    Fresh,
    /// The token is still valid, but a replacement should be obtained
    Stale,
    /// The token is no longer valid
    Expired,
}

impl TokenSet {
    /// Gets the access token, if the issuer provided one
    #[inline]
    pub fn access(&self) -> Option<&AccessTokenRef> {
        self.access.as_deref()
    }

    /// Gets the delegation token, if the issuer provided one
    #[inline]
    pub fn delegation(&self) -> Option<&DelegationTokenRef> {
        self.delegation.as_deref()
    }

    /// Gets the identity token, if the issuer provided one
    #[inline]
    pub fn identity(&self) -> Option<&IdentityTokenRef> {
        self.identity.as_deref()
    }

    /// Gets the refresh handle, if the issuer provided one
    #[inline]
    pub fn refresh_handle(&self) -> Option<&RefreshHandleRef> {
        self.refresh_handle.as_deref()
    }

    /// The value to present as the bearer credential on outbound requests
    ///
    /// Issuers populate different fields depending on the grant and account
    /// configuration, so the presentable value is chosen at read time: the
    /// access token is preferred, then the delegation token, then the
    /// identity token. Empty values are skipped.
    pub fn bearer(&self) -> Option<&str> {
        [
            self.access().map(AccessTokenRef::as_str),
            self.delegation().map(DelegationTokenRef::as_str),
            self.identity().map(IdentityTokenRef::as_str),
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
    }

    /// Gets the token set's issued lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token set was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time at which a proactive refresh becomes warranted
    #[inline]
    pub fn refresh_at(&self) -> UnixTime {
        self.refresh_at
    }

    /// Gets the time that the token set expires
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the token set's current lifecycle status
    #[inline]
    pub fn status(&self) -> TokenStatus {
        self.status_with_clock(&System)
    }

    /// Gets the token set's lifecycle status based on the current time as
    /// reported by the provided clock
    #[inline]
    pub fn status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.status_at(clock.now())
    }

    /// Gets the token set's lifecycle status as of the provided time
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.refresh_at {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token set would be valid as
    /// of the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.expiry {
            self.expiry - time
        } else {
            DurationSecs(0)
        }
    }
}

/// Configuration for scheduling the proactive refresh of a token set
///
/// The refresh offset is the fraction of the issued lifetime reserved as a
/// safety margin before expiry: a token with lifetime `L` becomes eligible
/// for refresh at `expiry - L * refresh_offset`.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    refresh_offset: f64,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a refresh offset of 25% of the issued lifetime and the system
    /// clock.
    fn default() -> Self {
        Self {
            refresh_offset: 0.25,
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration with the given refresh offset
    ///
    /// `refresh_offset` is clamped to `[0, 1]`, which keeps the refresh
    /// point within the token's valid interval.
    pub fn new(refresh_offset: f64) -> Self {
        Self {
            refresh_offset: refresh_offset.clamp(0.0, 1.0),
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            refresh_offset: self.refresh_offset,
            clock,
        }
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Builds a token set from issuer-provided values, stamping it with the
    /// current time and computing its refresh and expiry points
    pub fn create_token(
        &self,
        access: Option<AccessToken>,
        delegation: Option<DelegationToken>,
        identity: Option<IdentityToken>,
        refresh_handle: Option<RefreshHandle>,
        lifetime: DurationSecs,
    ) -> TokenSet {
        let issued = self.clock.now();
        let expiry = issued + lifetime;
        TokenSet {
            access: access.map(|t| t.into_boxed_ref()),
            delegation: delegation.map(|t| t.into_boxed_ref()),
            identity: identity.map(|t| t.into_boxed_ref()),
            refresh_handle: refresh_handle.map(|t| t.into_boxed_ref()),
            lifetime,
            issued,
            refresh_at: expiry - (lifetime * self.refresh_offset),
            expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostor_clock::TestClock;

    fn token(offset: f64, lifetime: u64) -> TokenSet {
        TokenLifetimeConfig::new(offset)
            .with_clock(TestClock::new(UnixTime(10_000)))
            .create_token(
                Some(AccessToken::from_static("access")),
                None,
                None,
                Some(RefreshHandle::from_static("handle")),
                DurationSecs(lifetime),
            )
    }

    #[test]
    fn refresh_point_is_offset_back_from_expiry() {
        let token = token(0.2, 3600);
        assert_eq!(token.issued(), UnixTime(10_000));
        assert_eq!(token.expiry(), UnixTime(13_600));
        assert_eq!(token.refresh_at(), token.expiry() - DurationSecs(720));
    }

    #[test]
    fn refresh_point_never_exceeds_expiry() {
        // offsets outside [0, 1] are clamped
        for offset in [0.0, 0.5, 1.0, 7.5, -2.0] {
            let token = token(offset, 600);
            assert!(token.refresh_at() <= token.expiry(), "offset {offset}");
            assert!(token.refresh_at() >= token.issued(), "offset {offset}");
        }
    }

    #[test]
    fn status_transitions_at_boundaries() {
        let token = token(0.2, 3600);
        assert_eq!(token.status_at(token.issued()), TokenStatus::Fresh);
        assert_eq!(
            token.status_at(token.refresh_at() - DurationSecs(1)),
            TokenStatus::Fresh
        );
        assert_eq!(token.status_at(token.refresh_at()), TokenStatus::Stale);
        assert_eq!(
            token.status_at(token.expiry() - DurationSecs(1)),
            TokenStatus::Stale
        );
        assert_eq!(token.status_at(token.expiry()), TokenStatus::Expired);
    }

    #[test]
    fn bearer_prefers_access_then_delegation_then_identity() {
        let config = TokenLifetimeConfig::default().with_clock(TestClock::new(UnixTime(0)));

        let all = config.create_token(
            Some(AccessToken::from_static("a")),
            Some(DelegationToken::from_static("d")),
            Some(IdentityToken::from_static("i")),
            None,
            DurationSecs(60),
        );
        assert_eq!(all.bearer(), Some("a"));

        let delegated = config.create_token(
            None,
            Some(DelegationToken::from_static("d")),
            Some(IdentityToken::from_static("i")),
            None,
            DurationSecs(60),
        );
        assert_eq!(delegated.bearer(), Some("d"));

        let identity_only = config.create_token(
            None,
            None,
            Some(IdentityToken::from_static("i")),
            None,
            DurationSecs(60),
        );
        assert_eq!(identity_only.bearer(), Some("i"));
    }

    #[test]
    fn bearer_skips_empty_values() {
        let config = TokenLifetimeConfig::default().with_clock(TestClock::new(UnixTime(0)));

        let blank_access = config.create_token(
            Some(AccessToken::from_static("")),
            Some(DelegationToken::from_static("d")),
            None,
            None,
            DurationSecs(60),
        );
        assert_eq!(blank_access.bearer(), Some("d"));

        let nothing = config.create_token(None, None, None, None, DurationSecs(60));
        assert_eq!(nothing.bearer(), None);
    }

    #[test]
    fn until_expired_saturates_at_zero() {
        let token = token(0.2, 100);
        assert_eq!(token.until_expired_at(token.issued()), DurationSecs(100));
        assert_eq!(
            token.until_expired_at(token.expiry() + DurationSecs(5)),
            DurationSecs(0)
        );
    }
}
