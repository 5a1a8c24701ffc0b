//! Long-lived log subscription with bounded reconnects.
//!
//! ```text
//! Connecting ──► Subscribed ──► Streaming
//!     ▲   │           │             │
//!     │   └───────────┴──── failure ┴──► Reconnecting ──► Terminated
//!     │                                       │        (budget spent)
//!     └───────────── after backoff ───────────┘
//! ```
//!
//! - A failure to connect, a rejected or unacknowledged subscribe, a socket
//!   error, a close frame and an error envelope all lead to `Reconnecting`.
//! - `Reconnecting` bumps the attempt counter. Once it exceeds
//!   [`BackoffPolicy::max_attempts`] the client stops with
//!   [`MonitorError::ExhaustedRetries`]; otherwise it sleeps
//!   `unit * base^attempt` and connects again.
//! - The counter returns to zero on every acknowledged subscription and every
//!   successfully handled message.
//! - Decoding problems never leave `Streaming`; sink failures end the run.
//!
//! Messages are handled inline, one at a time, so records reach the sink in
//! wire order. The stop token is checked while waiting for the next message
//! and during backoff, never in the middle of handling one.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::events::{DecodedEvent, EventDecoder, EventKind, RawLog};
use crate::rpc::websocket::{parse_envelope, InboundMessage, LogConnector, LogFilter, LogSession};
use crate::sink::EventSink;

/// Reconnect budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Reconnects allowed before giving up
    pub max_attempts: u32,
    /// Exponential base
    pub base: u32,
    /// Duration of one backoff unit
    pub unit: Duration,
}

impl BackoffPolicy {
    /// Policy with a one-second unit.
    #[must_use]
    pub const fn new(max_attempts: u32, base: u32) -> Self {
        Self {
            max_attempts,
            base,
            unit: Duration::from_secs(1),
        }
    }

    /// Override the backoff unit.
    #[must_use]
    pub const fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Delay before reconnect number `attempt` (1-based): `unit * base^attempt`.
    ///
    /// Saturates instead of overflowing.
    ///
    /// ```
    /// use std::time::Duration;
    /// use v3_pool_stream::subscription::BackoffPolicy;
    ///
    /// let policy = BackoffPolicy::new(5, 2);
    /// assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.base.checked_pow(attempt).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, 2)
    }
}

/// Waits out backoff delays.
pub trait Sleeper: Send + Sync {
    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Lifecycle phase of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the connection
    Connecting,
    /// Connection open, subscribe request in flight
    Subscribed,
    /// Receiving notifications
    Streaming,
    /// Waiting out a backoff delay
    Reconnecting,
    /// Stopped for good
    Terminated,
}

/// Reconnect bookkeeping owned by [`SubscriptionClient`].
#[derive(Debug)]
pub struct SubscriptionState {
    phase: Phase,
    filter: LogFilter,
    attempt: u32,
    backoff: BackoffPolicy,
    delay: Option<Duration>,
    last_error: Option<MonitorError>,
}

impl SubscriptionState {
    /// Fresh state in `Connecting` with no attempts spent.
    #[must_use]
    pub fn new(filter: LogFilter, backoff: BackoffPolicy) -> Self {
        Self {
            phase: Phase::Connecting,
            filter,
            attempt: 0,
            backoff,
            delay: None,
            last_error: None,
        }
    }

    /// Filter sent with every subscribe request.
    #[must_use]
    pub const fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Delay chosen by the last failure; `None` once a subscription is
    /// acknowledged or the budget is spent.
    #[must_use]
    pub const fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Consecutive failures since the last healthy point.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Most recent failure, if any.
    #[must_use]
    pub const fn last_error(&self) -> Option<&MonitorError> {
        self.last_error.as_ref()
    }

    fn on_connecting(&mut self) {
        self.phase = Phase::Connecting;
    }

    fn on_connected(&mut self) {
        self.phase = Phase::Subscribed;
    }

    /// Subscription acknowledged.
    pub fn on_subscribed(&mut self) {
        self.phase = Phase::Streaming;
        self.attempt = 0;
        self.delay = None;
    }

    /// A message was handled successfully.
    pub fn on_message(&mut self) {
        self.attempt = 0;
    }

    /// Record a transient failure and decide what happens next.
    ///
    /// Returns the delay to wait before the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ExhaustedRetries`] once the budget is spent; the
    /// state is then `Terminated`.
    pub fn on_failure(&mut self, cause: MonitorError) -> MonitorResult<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.backoff.max_attempts {
            self.phase = Phase::Terminated;
            self.delay = None;
            self.last_error = None;
            return Err(MonitorError::exhausted_retries(
                self.backoff.max_attempts,
                cause,
            ));
        }
        let delay = self.backoff.delay_for(self.attempt);
        self.phase = Phase::Reconnecting;
        self.delay = Some(delay);
        self.last_error = Some(cause);
        Ok(delay)
    }

    /// Mark the state terminal.
    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
    }
}

/// Counters reported when a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Successful connects
    pub connections: u64,
    /// Acknowledged subscriptions
    pub subscriptions: u64,
    /// Frames received while streaming
    pub messages: u64,
    /// Decoded Swap events
    pub swaps: u64,
    /// Decoded Mint events
    pub mints: u64,
    /// Decoded Burn events
    pub burns: u64,
    /// Logs with an unknown selector or too few topics
    pub skipped: u64,
    /// Frames or logs rejected as malformed
    pub rejected: u64,
    /// Logs from an address other than the pool
    pub ignored: u64,
    /// Logs flagged `removed` by a reorg
    pub removed: u64,
    /// Backoff waits started
    pub reconnects: u64,
}

impl SubscriptionStats {
    /// Total decoded events.
    #[must_use]
    pub const fn decoded(&self) -> u64 {
        self.swaps + self.mints + self.burns
    }

    fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Swap => self.swaps += 1,
            EventKind::Mint => self.mints += 1,
            EventKind::Burn => self.burns += 1,
        }
    }
}

enum StreamEnd {
    Stopped,
    Closed,
}

/// Drives one pool subscription from connect to termination.
pub struct SubscriptionClient<C, K, S = TokioSleeper> {
    connector: C,
    decoder: EventDecoder,
    sink: K,
    sleeper: S,
    state: SubscriptionState,
    stats: SubscriptionStats,
    observer: Option<broadcast::Sender<DecodedEvent>>,
    stop: CancellationToken,
}

impl<C, K> SubscriptionClient<C, K>
where
    C: LogConnector,
    K: EventSink,
{
    /// Client using the tokio timer and a private stop token.
    #[must_use]
    pub fn new(
        connector: C,
        decoder: EventDecoder,
        filter: LogFilter,
        sink: K,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            connector,
            decoder,
            sink,
            sleeper: TokioSleeper,
            state: SubscriptionState::new(filter, backoff),
            stats: SubscriptionStats::default(),
            observer: None,
            stop: CancellationToken::new(),
        }
    }
}

impl<C, K, S> SubscriptionClient<C, K, S>
where
    C: LogConnector,
    K: EventSink,
    S: Sleeper,
{
    /// Swap the backoff timer.
    #[must_use]
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> SubscriptionClient<C, K, S2> {
        SubscriptionClient {
            connector: self.connector,
            decoder: self.decoder,
            sink: self.sink,
            sleeper,
            state: self.state,
            stats: self.stats,
            observer: self.observer,
            stop: self.stop,
        }
    }

    /// Also publish decoded events on a broadcast channel.
    ///
    /// Publishing never blocks; events are dropped when nobody listens and
    /// lagging receivers miss the oldest ones.
    #[must_use]
    pub fn with_observer(mut self, observer: broadcast::Sender<DecodedEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_stop(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// The sink events are written to.
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    /// Counters so far.
    pub const fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Reconnect state.
    pub const fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Run until stopped or until the retry budget is spent.
    ///
    /// Returns the final counters when stopped through the token.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::ExhaustedRetries`] when reconnects run out
    /// - [`MonitorError::StorageError`] when the sink fails
    #[instrument(skip(self), fields(pool = %self.state.filter.address))]
    pub async fn run(&mut self) -> MonitorResult<SubscriptionStats> {
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            self.state.on_connecting();

            let cause = match self.connect_and_stream().await {
                Ok(StreamEnd::Stopped) => break,
                Ok(StreamEnd::Closed) => {
                    MonitorError::connection("remote closed the subscription stream", None)
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    error!(error = %e, "Subscription failed");
                    self.state.terminate();
                    return Err(e);
                }
            };

            warn!(error = %cause, "Subscription interrupted");
            let delay = match self.state.on_failure(cause) {
                Ok(delay) => delay,
                Err(e) => {
                    error!(error = %e, "Giving up on subscription");
                    return Err(e);
                }
            };
            self.stats.reconnects += 1;
            info!(
                attempt = self.state.attempt(),
                max_attempts = self.state.backoff.max_attempts,
                delay_ms = delay.as_millis(),
                "Reconnecting after backoff"
            );

            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                () = self.sleeper.sleep(delay) => {}
            }
        }

        self.state.terminate();
        info!(
            decoded = self.stats.decoded(),
            messages = self.stats.messages,
            "Subscription stopped"
        );
        Ok(self.stats)
    }

    async fn connect_and_stream(&mut self) -> MonitorResult<StreamEnd> {
        let mut session = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Ok(StreamEnd::Stopped),
            session = self.connector.connect() => session?,
        };
        self.stats.connections += 1;
        self.state.on_connected();

        let subscription_id = session.subscribe(&self.state.filter).await?;
        self.stats.subscriptions += 1;
        self.state.on_subscribed();
        info!(%subscription_id, "Streaming pool events");

        loop {
            let frame = tokio::select! {
                biased;
                () = self.stop.cancelled() => return Ok(StreamEnd::Stopped),
                frame = session.next_message() => frame?,
            };
            let Some(text) = frame else {
                return Ok(StreamEnd::Closed);
            };
            self.handle_frame(&text)?;
        }
    }

    fn handle_frame(&mut self, text: &str) -> MonitorResult<()> {
        self.stats.messages += 1;
        match parse_envelope(text) {
            Ok(InboundMessage::Log(log)) => self.handle_log(&log)?,
            Ok(InboundMessage::Error { message, .. }) => {
                return Err(MonitorError::subscription(
                    format!("node reported an error: {message}"),
                    None,
                ));
            }
            Ok(InboundMessage::Response { .. } | InboundMessage::Other) => {
                debug!("Ignoring non-notification frame");
            }
            Err(e) => {
                warn!(error = %e, "Malformed frame, skipping");
                self.stats.rejected += 1;
            }
        }
        self.state.on_message();
        Ok(())
    }

    fn handle_log(&mut self, log: &RawLog) -> MonitorResult<()> {
        if log.removed {
            warn!(tx = ?log.transaction_hash, "Skipping log removed by reorg");
            self.stats.removed += 1;
            return Ok(());
        }
        if log.address != self.state.filter.address {
            debug!(address = %log.address, "Skipping log from another contract");
            self.stats.ignored += 1;
            return Ok(());
        }

        match self.decoder.try_decode(log) {
            Ok(Some(event)) => {
                self.sink.append(&event)?;
                self.stats.record(event.kind());
                if let Some(observer) = &self.observer {
                    // No receivers is fine.
                    let _ = observer.send(event);
                }
            }
            Ok(None) => self.stats.skipped += 1,
            Err(e) => {
                warn!(error = %e, block = ?log.block_number, "Rejected pool log");
                self.stats.rejected += 1;
            }
        }
        Ok(())
    }
}
