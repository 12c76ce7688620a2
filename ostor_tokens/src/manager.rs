use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::{error, fmt, time::Duration};

use ostor_clock::{Clock, System};
use tokio::sync::Mutex;

use crate::backoff::{RetryDelayConfig, RetryDelayTracker, WithRetryDelay};
use crate::sources::{Grant, Retryability, TokenSource};
use crate::tokens::TokenStatus;
use crate::TokenSet;

const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 3;
const DEFAULT_REFRESH_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Manages the lifecycle of the token set used to sign outbound requests
///
/// The manager caches the most recently issued token set and decides, per
/// read, whether it can be handed out as-is, whether a replacement should be
/// obtained in the background, or whether the caller must wait for a fresh
/// exchange:
///
/// * With no cached token set, or an expired one, [`get_token`][Self::get_token]
///   performs the exchange itself. The exchange is single-flight: concurrent
///   callers in this state coalesce onto one request, and the losers simply
///   observe the token set published by the winner.
/// * With a cached token set past its refresh point but not yet expired, the
///   cached value is returned immediately and a background task redeems the
///   refresh handle, so callers never wait out a refresh that isn't yet
///   necessary. At most one background refresh is in flight at a time.
///
/// A manager is constructed per credential identity and injected into
/// whatever signs requests with it; cloning is shallow and clones share the
/// same cache.
pub struct TokenManager<S, C = System> {
    source: Arc<S>,
    clock: C,
    current: Arc<RwLock<Option<Arc<TokenSet>>>>,
    fetch_gate: Arc<Mutex<()>>,
    refresh_in_flight: Arc<AtomicBool>,
    max_fetch_attempts: u32,
    fetch_retry: RetryDelayConfig,
    refresh_retry: RetryDelayConfig,
}

impl<S, C: Clone> Clone for TokenManager<S, C> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            clock: self.clock.clone(),
            current: Arc::clone(&self.current),
            fetch_gate: Arc::clone(&self.fetch_gate),
            refresh_in_flight: Arc::clone(&self.refresh_in_flight),
            max_fetch_attempts: self.max_fetch_attempts,
            fetch_retry: self.fetch_retry.clone(),
            refresh_retry: self.refresh_retry.clone(),
        }
    }
}

impl<S, C> fmt::Debug for TokenManager<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("max_fetch_attempts", &self.max_fetch_attempts)
            .field("fetch_retry", &self.fetch_retry)
            .field("refresh_retry", &self.refresh_retry)
            .field(
                "refresh_in_flight",
                &self.refresh_in_flight.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl<S: TokenSource> TokenManager<S> {
    /// Constructs a manager over the given token source
    ///
    /// Defaults: 3 fetch attempts on the synchronous path with exponential
    /// retry delays, a fixed 30 second retry interval on the background
    /// path, and the system clock.
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            clock: System,
            current: Arc::new(RwLock::new(None)),
            fetch_gate: Arc::new(Mutex::new(())),
            refresh_in_flight: Arc::new(AtomicBool::new(false)),
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            fetch_retry: RetryDelayConfig::default(),
            refresh_retry: RetryDelayConfig::fixed(DEFAULT_REFRESH_RETRY_INTERVAL),
        }
    }
}

impl<S, C> TokenManager<S, C> {
    /// Bounds the number of attempts made by a synchronous fetch
    ///
    /// Only retryable failures consume additional attempts; anything else
    /// fails fast. Values below 1 are treated as 1.
    pub fn with_max_fetch_attempts(mut self, attempts: u32) -> Self {
        self.max_fetch_attempts = attempts.max(1);
        self
    }

    /// Sets the delay configuration between synchronous fetch attempts
    pub fn with_fetch_retry(mut self, config: RetryDelayConfig) -> Self {
        self.fetch_retry = config;
        self
    }

    /// Sets the delay configuration between background refresh attempts
    pub fn with_refresh_retry(mut self, config: RetryDelayConfig) -> Self {
        self.refresh_retry = config;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenManager<S, D> {
        TokenManager {
            source: self.source,
            clock,
            current: self.current,
            fetch_gate: self.fetch_gate,
            refresh_in_flight: self.refresh_in_flight,
            max_fetch_attempts: self.max_fetch_attempts,
            fetch_retry: self.fetch_retry,
            refresh_retry: self.refresh_retry,
        }
    }

    /// The currently cached token set, if any, regardless of status
    pub fn current_token(&self) -> Option<Arc<TokenSet>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evicts the cached token set
    ///
    /// The next [`get_token`][Self::get_token] call is forced onto the
    /// synchronous exchange path.
    pub fn invalidate(&self) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.take().is_some() {
            tracing::debug!("cached token set evicted");
        }
    }

    /// Publishes a token set, swapping the shared reference
    ///
    /// Publication is monotonic in expiry: a token set is never replaced by
    /// one that expires earlier, so readers observe the published set or a
    /// strictly newer one even when the synchronous and background paths
    /// race.
    fn publish(&self, token: TokenSet) -> Arc<TokenSet> {
        let token = Arc::new(token);
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match &*current {
            Some(existing) if existing.expiry() > token.expiry() => {
                tracing::trace!(
                    published_expiry = existing.expiry().0,
                    incoming_expiry = token.expiry().0,
                    "discarding fetched token set that expires before the published one"
                );
                Arc::clone(existing)
            }
            _ => {
                *current = Some(Arc::clone(&token));
                token
            }
        }
    }
}

impl<S, C> TokenManager<S, C>
where
    S: TokenSource + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Returns a token set that is valid right now
    ///
    /// Depending on the state of the cache this call returns immediately
    /// (fresh hit, or a stale-but-valid hit that triggers a background
    /// refresh) or awaits a synchronous exchange (cold start, expiry, or a
    /// stale token set without a refresh handle). Fetch failures propagate
    /// unchanged to the caller; an expired token set is never returned.
    ///
    /// Signers extract the presentable credential from the returned set via
    /// [`TokenSet::bearer`].
    pub async fn get_token(&self) -> Result<Arc<TokenSet>, S::Error> {
        let observed = self.current_token();
        if let Some(token) = &observed {
            match token.status_with_clock(&self.clock) {
                TokenStatus::Fresh => return Ok(Arc::clone(token)),
                TokenStatus::Stale => {
                    if token.refresh_handle().is_some() {
                        self.spawn_background_refresh();
                        return Ok(Arc::clone(token));
                    }
                    // Without a refresh handle only the account secret can
                    // renew the token set; fall through to the synchronous
                    // path rather than waiting for expiry.
                }
                TokenStatus::Expired => {}
            }
        }

        self.fetch_and_publish(observed).await
    }

    /// Synchronous exchange path, serialized across concurrent callers
    ///
    /// `observed` is the cached token set the caller judged unusable before
    /// queueing on the gate, used to tell a winner's publication apart from
    /// the token set the caller came to replace.
    async fn fetch_and_publish(
        &self,
        observed: Option<Arc<TokenSet>>,
    ) -> Result<Arc<TokenSet>, S::Error> {
        let _gate = self.fetch_gate.lock().await;

        // A caller that lost the race observes the winner's token set here
        // and skips its own exchange. Any still-valid publication counts,
        // not just a fresh one: with a refresh offset of 1.0 a just-issued
        // token set is already stale, and queued callers must not each
        // repeat the exchange.
        if let Some(token) = self.current_token() {
            let published_while_queued = !observed
                .as_ref()
                .is_some_and(|seen| Arc::ptr_eq(seen, &token));
            match token.status_with_clock(&self.clock) {
                TokenStatus::Fresh => return Ok(token),
                TokenStatus::Stale if published_while_queued => {
                    if token.refresh_handle().is_some() {
                        self.spawn_background_refresh();
                    }
                    return Ok(token);
                }
                _ => {}
            }
        }

        let mut delays = RetryDelayTracker::new(self.fetch_retry.clone());
        let mut attempt = 0;
        let token = loop {
            attempt += 1;
            match self
                .source
                .fetch(Grant::Exchange)
                .await
                .with_retry_delay(&mut delays)
            {
                Ok(token) => break token,
                Err((error, delay))
                    if error.is_retryable() && attempt < self.max_fetch_attempts =>
                {
                    tracing::warn!(
                        error = &error as &dyn error::Error,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "token exchange failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((error, _)) => return Err(error),
            }
        };

        Ok(self.publish(token))
    }

    /// Hands the stale token set to the background refresher
    ///
    /// At most one refresh task runs per manager; a trigger while one is in
    /// flight is a no-op.
    fn spawn_background_refresh(&self) {
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::debug!("scheduling background token refresh");
        let manager = self.clone();
        tokio::spawn(manager.background_refresh());
    }

    /// Redeems the refresh handle until a new token set is published or the
    /// cached one expires
    ///
    /// Failures here are logged and retried, never surfaced: once the cached
    /// token set truly expires the next reader runs the synchronous path and
    /// sees the error itself.
    async fn background_refresh(self) {
        let mut delays = RetryDelayTracker::new(self.refresh_retry.clone());

        loop {
            let Some(stale) = self.current_token() else {
                break;
            };
            if self.clock.now() >= stale.expiry() {
                tracing::debug!(
                    expiry = stale.expiry().0,
                    "cached token set expired before a refresh succeeded, \
                     leaving renewal to the synchronous path"
                );
                break;
            }
            let Some(handle) = stale.refresh_handle() else {
                break;
            };

            match self
                .source
                .fetch(Grant::Refresh(handle))
                .await
                .with_retry_delay(&mut delays)
            {
                Ok(token) => {
                    tracing::debug!(
                        refresh_at = token.refresh_at().0,
                        expiry = token.expiry().0,
                        "background refresh published a new token set"
                    );
                    self.publish(token);
                    break;
                }
                Err((error, delay)) => {
                    tracing::warn!(
                        error = &error as &dyn error::Error,
                        delay_ms = delay.as_millis() as u64,
                        "background token refresh failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.refresh_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RetryDelayConfig;
    use crate::sources::{Grant, Retryability, TokenSource};
    use crate::tokens::TokenLifetimeConfig;
    use crate::{AccessToken, RefreshHandle};
    use async_trait::async_trait;
    use ostor_clock::{DurationSecs, UnixTime};
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use thiserror::Error;

    #[derive(Clone, Debug, Default)]
    struct SharedClock(Arc<AtomicU64>);

    impl SharedClock {
        fn new(start: u64) -> Self {
            Self(Arc::new(AtomicU64::new(start)))
        }

        fn set(&self, now: u64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for SharedClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("transient failure")]
        Transient,
        #[error("unauthorized")]
        Unauthorized,
    }

    impl Retryability for FakeError {
        fn is_retryable(&self) -> bool {
            matches!(self, FakeError::Transient)
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum Behavior {
        Succeed,
        FailTransient,
        FailAuth,
    }

    impl Behavior {
        fn apply(self, token: TokenSet) -> Result<TokenSet, FakeError> {
            match self {
                Behavior::Succeed => Ok(token),
                Behavior::FailTransient => Err(FakeError::Transient),
                Behavior::FailAuth => Err(FakeError::Unauthorized),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct FakeSource {
        clock: SharedClock,
        lifetime: DurationSecs,
        offset: f64,
        with_handle: bool,
        delay: Duration,
        on_exchange: Behavior,
        on_refresh: Behavior,
        exchanges: Arc<AtomicUsize>,
        refreshes: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn new(clock: SharedClock) -> Self {
            Self {
                clock,
                lifetime: DurationSecs(3600),
                offset: 0.2,
                with_handle: true,
                delay: Duration::ZERO,
                on_exchange: Behavior::Succeed,
                on_refresh: Behavior::Succeed,
                exchanges: Arc::default(),
                refreshes: Arc::default(),
            }
        }

        fn token(&self, tag: &str, n: usize) -> TokenSet {
            TokenLifetimeConfig::new(self.offset)
                .with_clock(self.clock.clone())
                .create_token(
                    Some(AccessToken::from(format!("{tag}-{n}"))),
                    None,
                    None,
                    self.with_handle
                        .then(|| RefreshHandle::from_static("handle")),
                    self.lifetime,
                )
        }
    }

    #[async_trait]
    impl TokenSource for FakeSource {
        type Error = FakeError;

        async fn fetch(&self, grant: Grant<'_>) -> Result<TokenSet, FakeError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match grant {
                Grant::Exchange => {
                    let n = self.exchanges.fetch_add(1, Ordering::SeqCst);
                    self.on_exchange.apply(self.token("exchange", n))
                }
                Grant::Refresh(_) => {
                    let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
                    self.on_refresh.apply(self.token("refresh", n))
                }
            }
        }
    }

    fn manager(source: &FakeSource) -> TokenManager<FakeSource, SharedClock> {
        TokenManager::new(source.clone())
            .with_fetch_retry(RetryDelayConfig::fixed(Duration::from_millis(1)))
            .with_refresh_retry(RetryDelayConfig::fixed(Duration::from_millis(10)))
            .with_clock(source.clock.clone())
    }

    async fn wait_for_new_bearer(
        manager: &TokenManager<FakeSource, SharedClock>,
        old: &str,
    ) -> Arc<TokenSet> {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Some(current) = manager.current_token() {
                if current.bearer() != Some(old) {
                    return current;
                }
            }
        }
        panic!("background refresh never published a new token set");
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_a_second_fetch() {
        let source = FakeSource::new(SharedClock::new(1_000));
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.bearer(), Some("exchange-0"));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_start_coalesces_to_one_fetch() {
        let mut source = FakeSource::new(SharedClock::new(1_000));
        source.delay = Duration::from_millis(50);
        let manager = manager(&source);

        let mut callers = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            callers.push(tokio::spawn(async move { manager.get_token().await }));
        }

        for caller in callers {
            let token = caller.await.unwrap().unwrap();
            assert_eq!(token.bearer(), Some("exchange-0"));
        }
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_start_coalesces_even_when_immediately_stale() {
        // with the full lifetime reserved for refresh, a just-issued token
        // set is already stale; queued callers must still accept the
        // winner's publication instead of each repeating the exchange
        let mut source = FakeSource::new(SharedClock::new(1_000));
        source.offset = 1.0;
        source.delay = Duration::from_millis(50);
        let manager = manager(&source);

        let mut callers = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            callers.push(tokio::spawn(async move { manager.get_token().await }));
        }

        for caller in callers {
            let token = caller.await.unwrap().unwrap();
            assert_eq!(token.bearer(), Some("exchange-0"));
        }
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_reads_return_cached_token_and_schedule_one_refresh() {
        let clock = SharedClock::new(1_000);
        let mut source = FakeSource::new(clock.clone());
        source.delay = Duration::from_millis(20);
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        assert_eq!(first.refresh_at(), first.expiry() - DurationSecs(720));

        // one second into the stale window
        clock.set(first.refresh_at().0 + 1);

        let mut readers = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            readers.push(tokio::spawn(async move { manager.get_token().await }));
        }
        for reader in readers {
            let token = reader.await.unwrap().unwrap();
            assert_eq!(token.bearer(), Some("exchange-0"), "stale reads never block");
        }

        let refreshed = wait_for_new_bearer(&manager, "exchange-0").await;
        assert_eq!(refreshed.bearer(), Some("refresh-0"));
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_forces_a_synchronous_fetch() {
        let clock = SharedClock::new(1_000);
        let source = FakeSource::new(clock.clone());
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        clock.set(first.expiry().0);

        let second = manager.get_token().await.unwrap();
        assert_eq!(second.bearer(), Some("exchange-1"));
        assert_eq!(
            second.status_with_clock(&clock),
            TokenStatus::Fresh,
            "an expired token set is never handed out"
        );
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_token_without_a_handle_is_replaced_synchronously() {
        let clock = SharedClock::new(1_000);
        let mut source = FakeSource::new(clock.clone());
        source.with_handle = false;
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        clock.set(first.refresh_at().0 + 1);

        let second = manager.get_token().await.unwrap();
        assert_eq!(second.bearer(), Some("exchange-1"));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 2);
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_bound_is_respected() {
        let mut source = FakeSource::new(SharedClock::new(1_000));
        source.on_exchange = Behavior::FailTransient;
        let manager = manager(&source).with_max_fetch_attempts(3);

        let error = manager.get_token().await.unwrap_err();
        assert!(matches!(error, FakeError::Transient));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_short_circuit() {
        let mut source = FakeSource::new(SharedClock::new(1_000));
        source.on_exchange = Behavior::FailAuth;
        let manager = manager(&source).with_max_fetch_attempts(5);

        let error = manager.get_token().await.unwrap_err();
        assert!(matches!(error, FakeError::Unauthorized));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_exchange() {
        let source = FakeSource::new(SharedClock::new(1_000));
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        assert_eq!(first.bearer(), Some("exchange-0"));

        manager.invalidate();
        assert!(manager.current_token().is_none());

        let second = manager.get_token().await.unwrap();
        assert_eq!(second.bearer(), Some("exchange-1"));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn background_refresh_gives_up_once_expired() {
        let clock = SharedClock::new(1_000);
        let mut source = FakeSource::new(clock.clone());
        source.lifetime = DurationSecs(100);
        source.on_refresh = Behavior::FailTransient;
        let manager = manager(&source);

        let first = manager.get_token().await.unwrap();
        assert_eq!(first.expiry(), UnixTime(1_100));

        // enter the stale window and let the background task fail a few times
        clock.set(first.refresh_at().0 + 1);
        let stale = manager.get_token().await.unwrap();
        assert_eq!(stale.bearer(), Some("exchange-0"));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(source.refreshes.load(Ordering::SeqCst) >= 1);

        // the cached token expires while the refresher is backing off
        clock.set(first.expiry().0 + 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!manager.refresh_in_flight.load(Ordering::SeqCst));

        // the next read renews synchronously
        let renewed = manager.get_token().await.unwrap();
        assert_eq!(renewed.bearer(), Some("exchange-1"));
        assert_eq!(source.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publication_never_downgrades_expiry() {
        let clock = SharedClock::new(1_000);
        let source = FakeSource::new(clock.clone());
        let manager = manager(&source);

        let long = manager.publish(source.token("long", 0));
        assert_eq!(long.expiry(), UnixTime(4_600));

        let mut short_source = source.clone();
        short_source.lifetime = DurationSecs(60);
        let published = manager.publish(short_source.token("short", 0));

        assert!(Arc::ptr_eq(&long, &published));
        assert_eq!(
            manager.current_token().unwrap().bearer(),
            Some("long-0"),
            "a token set expiring earlier than the published one is dropped"
        );
    }
}
