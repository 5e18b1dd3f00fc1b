//! Sliding-window warning counter with a self-restart trigger.
//!
//! Security warnings (rejected credentials, unauthorized attempts) flow over
//! the event bus. A sustained burst inside the window means something is
//! systematically wrong (or someone is hammering the bot), so the daemon
//! asks to be restarted by its supervisor rather than limping on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, error, info};

use crate::config::WatchdogConfig;
use crate::events::SecurityEvent;

/// Exit status meaning "restart me". Distinct from success and crash codes
/// so a supervising process can apply a fixed restart backoff.
pub const RESTART_EXIT_CODE: i32 = 75;

pub struct WarningWatchdog {
    config: WatchdogConfig,
    event_bus: broadcast::Sender<SecurityEvent>,
    restart_tx: mpsc::Sender<()>,
    window: Mutex<VecDeque<i64>>,
    tripped: AtomicBool,
}

impl WarningWatchdog {
    #[must_use]
    pub fn new(
        config: WatchdogConfig,
        event_bus: broadcast::Sender<SecurityEvent>,
        restart_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            config,
            event_bus,
            restart_tx,
            window: Mutex::new(VecDeque::new()),
            tripped: AtomicBool::new(false),
        }
    }

    /// Record one warning at `now` (unix seconds) and evaluate the burst
    /// condition. Strictly more than `threshold` warnings inside the window
    /// requests a restart; a single warning can never trip it.
    pub async fn record(&self, now: i64) {
        let in_window = {
            let mut window = self.window.lock().await;
            window.push_back(now);
            Self::evict(&mut window, now, self.config.window_seconds);
            window.len()
        };

        metrics::counter!("chime_warnings_total").increment(1);

        if self.config.enabled
            && in_window > self.config.threshold
            && !self.tripped.swap(true, Ordering::SeqCst)
        {
            error!(
                "Warning burst: {in_window} warnings within {}s (threshold {}); requesting restart",
                self.config.window_seconds, self.config.threshold
            );
            let _ = self.restart_tx.send(()).await;
        }
    }

    /// Current number of warnings inside the window, without recording one.
    pub async fn warning_count(&self, now: i64) -> usize {
        let mut window = self.window.lock().await;
        Self::evict(&mut window, now, self.config.window_seconds);
        window.len()
    }

    fn evict(window: &mut VecDeque<i64>, now: i64, window_seconds: u64) {
        let cutoff = now - i64::try_from(window_seconds).unwrap_or(i64::MAX);
        while let Some(&oldest) = window.front() {
            if oldest <= cutoff {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Subscribe to the security event bus and count every event. All bus
    /// events are warning-grade by construction.
    pub fn start_listener(self: Arc<Self>) {
        let mut rx = self.event_bus.subscribe();
        let watchdog = self;

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        debug!(?event, "Watchdog recorded warning");
                        watchdog.record(now_unix()).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        // The missed events were still warnings; count them.
                        error!(count, "Watchdog listener lagged");
                        let now = now_unix();
                        for _ in 0..count {
                            watchdog.record(now).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Watchdog listener event bus closed");
                        break;
                    }
                }
            }
        });
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog_with(
        enabled: bool,
        threshold: usize,
        window_seconds: u64,
    ) -> (WarningWatchdog, mpsc::Receiver<()>) {
        let (event_bus, _) = broadcast::channel(16);
        let (restart_tx, restart_rx) = mpsc::channel(1);

        let config = WatchdogConfig {
            enabled,
            threshold,
            window_seconds,
        };

        (
            WarningWatchdog::new(config, event_bus, restart_tx),
            restart_rx,
        )
    }

    #[tokio::test]
    async fn test_trips_strictly_above_threshold() {
        let (watchdog, mut restart_rx) = watchdog_with(true, 3, 600);
        let now = 1_000_000;

        for _ in 0..3 {
            watchdog.record(now).await;
        }
        assert!(restart_rx.try_recv().is_err());

        watchdog.record(now).await;
        assert!(restart_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_old_warnings_fall_out_of_window() {
        let (watchdog, mut restart_rx) = watchdog_with(true, 3, 600);
        let start = 1_000_000;

        for _ in 0..3 {
            watchdog.record(start).await;
        }

        // Beyond the window the burst has evaporated.
        let later = start + 601;
        watchdog.record(later).await;

        assert_eq!(watchdog.warning_count(later).await, 1);
        assert!(restart_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_watchdog_counts_but_never_signals() {
        let (watchdog, mut restart_rx) = watchdog_with(false, 2, 600);
        let now = 1_000_000;

        for _ in 0..10 {
            watchdog.record(now).await;
        }

        assert_eq!(watchdog.warning_count(now).await, 10);
        assert!(restart_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signals_at_most_once() {
        let (watchdog, mut restart_rx) = watchdog_with(true, 1, 600);
        let now = 1_000_000;

        for _ in 0..5 {
            watchdog.record(now).await;
        }

        assert!(restart_rx.try_recv().is_ok());
        assert!(restart_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_counts_bus_events() {
        let (event_bus, _initial_rx) = broadcast::channel(16);
        let (restart_tx, mut restart_rx) = mpsc::channel(1);

        let config = WatchdogConfig {
            enabled: true,
            threshold: 2,
            window_seconds: 600,
        };
        let watchdog = Arc::new(WarningWatchdog::new(config, event_bus.clone(), restart_tx));

        // start_listener subscribes synchronously, so events sent after this
        // call are never missed.
        watchdog.clone().start_listener();

        for _ in 0..3 {
            let _ = event_bus.send(SecurityEvent::PasswordRejected { user_id: 7 });
        }

        tokio::time::timeout(std::time::Duration::from_secs(2), restart_rx.recv())
            .await
            .expect("restart signal within timeout");
    }
}
