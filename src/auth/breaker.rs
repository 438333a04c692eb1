//! Circuit breaker guarding calls to the users API.
//!
//! ```text
//! Closed   -> Open:     `ready_to_trip(counts)` holds after a failure
//! Open     -> HalfOpen: `timeout` elapsed since the breaker opened
//! HalfOpen -> Closed:   `max_requests` consecutive successes
//! HalfOpen -> Open:     any failure
//! ```
//!
//! Counts belong to a generation. A generation ends on every state change and,
//! while closed, every `interval`. Outcomes reported for a generation that has
//! already ended are dropped, so a slow call can never trip a breaker that was
//! reset while it was in flight.

use parking_lot::Mutex;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn, Level};

pub const DEFAULT_MAX_REQUESTS: u32 = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_REQUESTS: u32 = 5;
pub const DEFAULT_FAILURE_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request outcomes recorded in the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Share of recorded requests that failed, `0.0` when nothing was recorded.
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

pub type TripFn = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;
pub type StateChangeFn = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Trip once at least `min_requests` were seen and the failure ratio reached `ratio`.
#[must_use]
pub fn failure_ratio_trip(min_requests: u32, ratio: f64) -> TripFn {
    Arc::new(move |counts: &Counts| {
        counts.requests >= min_requests && counts.failure_ratio() >= ratio
    })
}

#[derive(Clone)]
pub struct Settings {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: TripFn,
    on_state_change: Option<StateChangeFn>,
}

impl Settings {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: DEFAULT_MAX_REQUESTS,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            ready_to_trip: failure_ratio_trip(DEFAULT_MIN_REQUESTS, DEFAULT_FAILURE_RATIO),
            on_state_change: None,
        }
    }

    /// Trial calls admitted while half-open, also the success streak needed to close.
    /// Zero is treated as one.
    #[must_use]
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    /// Period after which closed-state counts are cleared. Zero keeps them forever.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// How long the breaker stays open before letting trial calls through.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ready_to_trip(mut self, ready_to_trip: TripFn) -> Self {
        self.ready_to_trip = ready_to_trip;
        self
    }

    #[must_use]
    pub fn with_on_state_change(mut self, on_state_change: StateChangeFn) -> Self {
        self.on_state_change = Some(on_state_change);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn max_requests(&self) -> u32 {
        self.max_requests
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// The breaker refused the call without running it.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Open | Self::TooManyRequests)
    }
}

/// Point-in-time view used by the health endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub state: State,
    pub counts: Counts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    from: State,
    to: State,
}

#[derive(Debug)]
struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

impl Inner {
    // Applies time-driven changes: closed window rollover and open -> half-open.
    fn current_state(&mut self, settings: &Settings, now: Instant) -> Option<Transition> {
        match self.state {
            State::Closed => {
                if self.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(settings, now);
                }
                None
            }
            State::Open => {
                if self.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(settings, State::HalfOpen, now)
                } else {
                    None
                }
            }
            State::HalfOpen => None,
        }
    }

    fn set_state(&mut self, settings: &Settings, to: State, now: Instant) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.new_generation(settings, now);
        Some(Transition { from, to })
    }

    fn new_generation(&mut self, settings: &Settings, now: Instant) {
        self.generation = self.generation.wrapping_add(1);
        self.counts.clear();
        self.expiry = match self.state {
            State::Closed if settings.interval.is_zero() => None,
            State::Closed => Some(now + settings.interval),
            State::Open => Some(now + settings.timeout),
            State::HalfOpen => None,
        };
    }

    fn on_success(&mut self, settings: &Settings, now: Instant) -> Option<Transition> {
        match self.state {
            State::Closed => {
                self.counts.on_success();
                None
            }
            State::HalfOpen => {
                self.counts.on_success();
                if self.counts.consecutive_successes >= settings.max_requests {
                    self.set_state(settings, State::Closed, now)
                } else {
                    None
                }
            }
            State::Open => None,
        }
    }

    fn on_failure(&mut self, settings: &Settings, now: Instant) -> Option<Transition> {
        match self.state {
            State::Closed => {
                self.counts.on_failure();
                if (settings.ready_to_trip)(&self.counts) {
                    self.set_state(settings, State::Open, now)
                } else {
                    None
                }
            }
            State::HalfOpen => self.set_state(settings, State::Open, now),
            State::Open => None,
        }
    }
}

/// Three-state circuit breaker shared by every concurrent login.
///
/// A single mutex guards state, counts and generation. The guarded future runs
/// outside the lock, so callers racing at a transition boundary may let a few
/// extra calls through.
pub struct CircuitBreaker {
    settings: Settings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let mut inner = Inner {
            state: State::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
        };
        inner.new_generation(&settings, Instant::now());

        Self {
            settings,
            inner: Mutex::new(inner),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.settings.name()
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.snapshot().state
    }

    #[must_use]
    pub fn counts(&self) -> Counts {
        self.snapshot().counts
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let (state, counts, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.current_state(&self.settings, now);
            (inner.state, inner.counts, transition)
        };
        self.emit(transition);

        Snapshot {
            name: self.settings.name.clone(),
            state,
            counts,
        }
    }

    /// Run `call` if the breaker admits it and record its outcome.
    ///
    /// # Errors
    /// Returns `BreakerError::Open` or `BreakerError::TooManyRequests` without running
    /// `call` when the breaker rejects it, otherwise `BreakerError::Inner` with the
    /// error returned by `call`.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_call()?;
        let mut guard = CallGuard {
            breaker: self,
            generation,
            settled: false,
        };

        let result = call().await;
        guard.settle(result.is_ok());

        result.map_err(BreakerError::Inner)
    }

    fn before_call<E>(&self) -> Result<u64, BreakerError<E>> {
        let now = Instant::now();
        let (result, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.current_state(&self.settings, now);
            let result = match inner.state {
                State::Open => Err(BreakerError::Open),
                State::HalfOpen if inner.counts.requests >= self.settings.max_requests => {
                    Err(BreakerError::TooManyRequests)
                }
                State::Closed | State::HalfOpen => {
                    inner.counts.on_request();
                    Ok(inner.generation)
                }
            };
            (result, transition)
        };
        self.emit(transition);

        if result.is_err() {
            debug!(breaker = %self.settings.name, "call rejected by circuit breaker");
        }
        result
    }

    fn after_call(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let (rollover, outcome) = {
            let mut inner = self.inner.lock();
            let rollover = inner.current_state(&self.settings, now);
            if inner.generation == generation {
                let outcome = if success {
                    inner.on_success(&self.settings, now)
                } else {
                    inner.on_failure(&self.settings, now)
                };
                (rollover, outcome)
            } else {
                debug!(breaker = %self.settings.name, "dropping outcome from a previous generation");
                (rollover, None)
            }
        };
        self.emit(rollover);
        self.emit(outcome);
    }

    fn emit(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };

        if transition_level(to) == Level::ERROR {
            error!(breaker = %self.settings.name, %from, %to, "circuit breaker state changed");
        } else {
            warn!(breaker = %self.settings.name, %from, %to, "circuit breaker state changed");
        }

        if let Some(callback) = &self.settings.on_state_change {
            callback(&self.settings.name, from, to);
        }
    }
}

// Opening is logged at error so it shows at the default verbosity.
fn transition_level(to: State) -> Level {
    if to == State::Open {
        Level::ERROR
    } else {
        Level::WARN
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

// Records the outcome of an admitted call. A call whose future is dropped before
// finishing (e.g. client disconnect) counts as a failure.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_call(self.generation, false);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::{sync::Semaphore, time::advance};

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Settings::new("test"))
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<Boom>> {
        cb.execute(|| async { Ok::<(), Boom>(()) }).await
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<Boom>> {
        cb.execute(|| async { Err::<(), Boom>(Boom) }).await
    }

    async fn trip(cb: &CircuitBreaker) {
        for _ in 0..DEFAULT_MIN_REQUESTS {
            let _ = fail(cb).await;
        }
        assert_eq!(cb.state(), State::Open);
    }

    async fn wait_for_requests(cb: &CircuitBreaker, requests: u32) {
        while cb.counts().requests < requests {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_closed_with_empty_counts() {
        let cb = breaker();
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(cb.name(), "test");
    }

    #[tokio::test(start_paused = true)]
    async fn records_successes_and_failures() {
        let cb = breaker();
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(Boom))));

        let counts = cb.counts();
        assert_eq!(counts.requests, 3);
        assert_eq!(counts.total_successes, 2);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.consecutive_successes, 0);
        assert_eq!(counts.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_trip_below_minimum_requests() {
        let cb = breaker();
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().total_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn trips_at_sixty_percent_failures() {
        let cb = breaker();
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Closed);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Open);
        // Counts start over in the new state.
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_failure_ratio() {
        let cb = breaker();
        for _ in 0..3 {
            succeed(&cb).await.unwrap();
        }
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        // 3 failures out of 6 requests
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_never_invokes_call() {
        let cb = breaker();
        trip(&cb).await;

        let calls = AtomicUsize::new(0);
        for _ in 0..10 {
            let result = cb
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Boom>(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Open)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.counts().requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn moves_to_half_open_after_timeout() {
        let cb = breaker();
        trip(&cb).await;

        advance(DEFAULT_TIMEOUT - Duration::from_secs(1)).await;
        assert_eq!(cb.state(), State::Open);

        advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), State::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_consecutive_successes() {
        let cb = breaker();
        trip(&cb).await;
        advance(DEFAULT_TIMEOUT).await;

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let cb = breaker();
        trip(&cb).await;
        advance(DEFAULT_TIMEOUT).await;

        succeed(&cb).await.unwrap();
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Open);
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open)));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_at_most_max_requests() {
        let cb = Arc::new(breaker());
        trip(&cb).await;
        advance(DEFAULT_TIMEOUT).await;

        let gate = Arc::new(Semaphore::new(0));
        let mut trials = Vec::new();
        for _ in 0..DEFAULT_MAX_REQUESTS {
            let cb = cb.clone();
            let gate = gate.clone();
            trials.push(tokio::spawn(async move {
                cb.execute(|| async move {
                    let _permit = gate.acquire().await;
                    Ok::<(), Boom>(())
                })
                .await
            }));
        }
        wait_for_requests(&cb, DEFAULT_MAX_REQUESTS).await;

        let calls = AtomicUsize::new(0);
        let extra = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Boom>(())
            })
            .await;
        assert!(matches!(extra, Err(BreakerError::TooManyRequests)));
        assert!(extra.is_err_and(|err| err.is_rejected()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate.add_permits(DEFAULT_MAX_REQUESTS as usize);
        for trial in trials {
            trial.await.unwrap().unwrap();
        }
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_counts_reset_every_interval() {
        let cb = breaker();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.counts().total_failures, 2);

        advance(DEFAULT_INTERVAL).await;
        assert_eq!(cb.counts(), Counts::default());

        // Two old failures no longer count towards tripping.
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_keeps_closed_counts() {
        let cb = CircuitBreaker::new(Settings::new("test").with_interval(Duration::ZERO));
        let _ = fail(&cb).await;
        advance(Duration::from_secs(3600)).await;
        assert_eq!(cb.counts().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_from_previous_generation_is_ignored() {
        let cb = Arc::new(breaker());
        let gate = Arc::new(Semaphore::new(0));

        let slow = {
            let cb = cb.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _permit = gate.acquire().await;
                    Err::<(), Boom>(Boom)
                })
                .await
            })
        };
        wait_for_requests(&cb, 1).await;

        advance(DEFAULT_INTERVAL).await;
        gate.add_permits(1);
        assert!(matches!(slow.await.unwrap(), Err(BreakerError::Inner(Boom))));

        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_counts_as_failure() {
        let cb = breaker();
        let pending = cb.execute(|| std::future::pending::<Result<(), Boom>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_reported() {
        let events: Arc<Mutex<Vec<(String, State, State)>>> = Arc::default();
        let sink = events.clone();
        let cb = CircuitBreaker::new(Settings::new("users").with_on_state_change(Arc::new(
            move |name: &str, from: State, to: State| {
                sink.lock().push((name.to_string(), from, to));
            },
        )));

        trip(&cb).await;
        advance(DEFAULT_TIMEOUT).await;
        for _ in 0..DEFAULT_MAX_REQUESTS {
            succeed(&cb).await.unwrap();
        }

        let events = events.lock().clone();
        assert_eq!(
            events,
            vec![
                ("users".to_string(), State::Closed, State::Open),
                ("users".to_string(), State::Open, State::HalfOpen),
                ("users".to_string(), State::HalfOpen, State::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn custom_trip_condition() {
        let cb = CircuitBreaker::new(
            Settings::new("test").with_ready_to_trip(Arc::new(|counts: &Counts| {
                counts.consecutive_failures >= 2
            })),
        );
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Closed);
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn failure_ratio_of_empty_counts_is_zero() {
        assert!(Counts::default().failure_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn state_labels() {
        assert_eq!(State::Closed.to_string(), "closed");
        assert_eq!(State::Open.to_string(), "open");
        assert_eq!(State::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn opening_logs_at_error() {
        assert_eq!(transition_level(State::Open), Level::ERROR);
        assert_eq!(transition_level(State::HalfOpen), Level::WARN);
        assert_eq!(transition_level(State::Closed), Level::WARN);
    }

    #[test]
    fn max_requests_is_at_least_one() {
        assert_eq!(Settings::new("test").with_max_requests(0).max_requests(), 1);
    }
}
