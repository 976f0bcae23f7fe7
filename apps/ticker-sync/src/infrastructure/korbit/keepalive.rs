//! Keep-Alive Timer
//!
//! Periodic liveness probe for an open session. The timer does not touch
//! the socket itself: it asks the session loop to send a probe and tells it
//! when the peer has gone quiet for too long.
//!
//! Every running timer holds a [`TimerGuard`] so the number of live timers
//! per connection can be observed from outside.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Keep-alive timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Time between probes.
    pub interval: Duration,
    /// Silence after a probe that counts as a dead peer.
    pub ack_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Requests from the timer to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// Send a probe now.
    Probe,
    /// No acknowledgement arrived in time.
    Expired,
}

/// Liveness bookkeeping shared by the timer and the session's reader.
#[derive(Debug)]
pub struct Liveness {
    last_ack: RwLock<Instant>,
    awaiting_ack: AtomicBool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Fresh state, counted as alive now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_ack: RwLock::new(Instant::now()),
            awaiting_ack: AtomicBool::new(false),
        }
    }

    /// Any inbound traffic proves the peer is alive.
    pub fn record_ack(&self) {
        *self.last_ack.write() = Instant::now();
        self.awaiting_ack.store(false, Ordering::SeqCst);
    }

    /// A probe went out.
    pub fn record_probe(&self) {
        self.awaiting_ack.store(true, Ordering::SeqCst);
    }

    /// Whether a probe is outstanding.
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::SeqCst)
    }

    /// A probe is outstanding and nothing has arrived for `timeout`.
    #[must_use]
    pub fn is_overdue(&self, timeout: Duration) -> bool {
        self.is_awaiting_ack() && self.silence() >= timeout
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_ack.read().elapsed()
    }
}

/// Counts of keep-alive timers for one connection.
#[derive(Debug, Default)]
pub struct TimerCounters {
    active: AtomicUsize,
    started: AtomicU64,
}

impl TimerCounters {
    /// Timers currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Timers ever started.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> TimerGuard {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        TimerGuard(Arc::clone(self))
    }
}

/// Marks a timer as running until dropped.
#[derive(Debug)]
pub struct TimerGuard(Arc<TimerCounters>);

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The timer task.
pub struct KeepAlive {
    config: KeepAliveConfig,
    liveness: Arc<Liveness>,
    event_tx: mpsc::Sender<KeepAliveEvent>,
    cancel: CancellationToken,
    guard: TimerGuard,
}

impl KeepAlive {
    /// Register a timer with `counters`. It starts ticking when [`run`](Self::run) is polled.
    #[must_use]
    pub fn new(
        config: KeepAliveConfig,
        liveness: Arc<Liveness>,
        event_tx: mpsc::Sender<KeepAliveEvent>,
        cancel: CancellationToken,
        counters: &Arc<TimerCounters>,
    ) -> Self {
        Self {
            config,
            liveness,
            event_tx,
            cancel,
            guard: counters.enter(),
        }
    }

    /// Tick until cancelled, until the peer expires, or until the session
    /// stops listening.
    ///
    /// Each probe arms a deadline `ack_timeout` later. The peer expires at
    /// that deadline if a probe is still unanswered and nothing has arrived
    /// for `ack_timeout`.
    pub async fn run(self) {
        let _guard = self.guard;
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ack_deadline: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keep-alive timer cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if self.liveness.is_overdue(self.config.ack_timeout) {
                        KeepAliveEvent::Expired
                    } else {
                        ack_deadline.get_or_insert_with(|| Instant::now() + self.config.ack_timeout);
                        KeepAliveEvent::Probe
                    }
                }
                () = tokio::time::sleep_until(ack_deadline.unwrap_or_else(Instant::now)), if ack_deadline.is_some() => {
                    ack_deadline = None;
                    if self.liveness.is_overdue(self.config.ack_timeout) {
                        KeepAliveEvent::Expired
                    } else {
                        if self.liveness.is_awaiting_ack() {
                            let remaining = self.config.ack_timeout.saturating_sub(self.liveness.silence());
                            ack_deadline = Some(Instant::now() + remaining);
                        }
                        continue;
                    }
                }
            };

            if event == KeepAliveEvent::Expired {
                tracing::warn!(
                    silence_ms = u64::try_from(self.liveness.silence().as_millis()).unwrap_or(u64::MAX),
                    timeout_ms = u64::try_from(self.config.ack_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Keep-alive acknowledgement overdue"
                );
            }
            if self.event_tx.send(event).await.is_err() {
                tracing::debug!("Session gone, stopping keep-alive timer");
                break;
            }
            if event == KeepAliveEvent::Expired {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_timer(
        config: KeepAliveConfig,
        liveness: Arc<Liveness>,
        counters: &Arc<TimerCounters>,
    ) -> (
        mpsc::Receiver<KeepAliveEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let timer = KeepAlive::new(config, liveness, tx, cancel.clone(), counters);
        (rx, cancel, tokio::spawn(timer.run()))
    }

    #[test]
    fn liveness_tracks_outstanding_probe() {
        let liveness = Liveness::new();
        assert!(!liveness.is_awaiting_ack());
        liveness.record_probe();
        assert!(liveness.is_awaiting_ack());
        liveness.record_ack();
        assert!(!liveness.is_awaiting_ack());
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_needs_outstanding_probe_and_silence() {
        let liveness = Liveness::new();
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!liveness.is_overdue(Duration::from_secs(10)));

        liveness.record_probe();
        assert!(liveness.is_overdue(Duration::from_secs(10)));
        assert!(!liveness.is_overdue(Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_waits_one_interval() {
        let counters = Arc::new(TimerCounters::default());
        let (mut rx, cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), Arc::new(Liveness::new()), &counters);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_probe_expires() {
        let counters = Arc::new(TimerCounters::default());
        let liveness = Arc::new(Liveness::new());
        let (mut rx, _cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), liveness.clone(), &counters);

        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));
        liveness.record_probe();
        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Expired));

        handle.await.unwrap();
        assert_eq!(counters.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_follows_ack_timeout_not_next_tick() {
        let counters = Arc::new(TimerCounters::default());
        let liveness = Arc::new(Liveness::new());
        let started = Instant::now();
        let (mut rx, _cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), liveness.clone(), &counters);

        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));
        liveness.record_probe();
        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Expired));

        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41),
            "expired after {elapsed:?}"
        );
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_before_deadline_prevents_expiry() {
        let counters = Arc::new(TimerCounters::default());
        let liveness = Arc::new(Liveness::new());
        let started = Instant::now();
        let (mut rx, cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), liveness.clone(), &counters);

        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));
        liveness.record_probe();
        tokio::time::sleep(Duration::from_secs(9)).await;
        liveness.record_ack();

        assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));
        assert!(started.elapsed() >= Duration::from_secs(60));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_probes_keep_ticking() {
        let counters = Arc::new(TimerCounters::default());
        let liveness = Arc::new(Liveness::new());
        let (mut rx, cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), liveness.clone(), &counters);

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(KeepAliveEvent::Probe));
            liveness.record_probe();
            liveness.record_ack();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn guard_tracks_active_timers() {
        let counters = Arc::new(TimerCounters::default());
        let (_rx, cancel, handle) =
            spawn_timer(KeepAliveConfig::default(), Arc::new(Liveness::new()), &counters);

        assert_eq!(counters.active(), 1);
        assert_eq!(counters.started(), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(counters.active(), 0);
        assert_eq!(counters.started(), 1);
    }
}
