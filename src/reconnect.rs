//! Client-side reconnect supervisor: exponential backoff with jitter, a
//! pluggable URI-rewrite hook, and cooperative cancellation.

use crate::config::ClientConfig;
use crate::connection::WSConnection;
use crate::error::Error;
use crate::handshake::connect_async_with_config;
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReconnectPhase {
    Connecting = 0,
    Connected = 1,
    Reconnecting = 2,
    Disconnecting = 3,
    Disconnected = 4,
    Failed = 5,
}

impl ReconnectPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReconnectPhase::Connecting,
            1 => ReconnectPhase::Connected,
            2 => ReconnectPhase::Reconnecting,
            3 => ReconnectPhase::Disconnecting,
            4 => ReconnectPhase::Disconnected,
            _ => ReconnectPhase::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: f64,
    /// 0 means unlimited attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: false,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Computes the delay before the given attempt (1-indexed), applying
    /// the exponential backoff curve then a uniform jitter factor in
    /// `[1-jitter, 1+jitter]`. Overflow in the exponent clamps to `max_delay`
    /// rather than panicking or wrapping.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.backoff_multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let base_secs = self.initial_delay.as_secs_f64() * multiplier;

        let base = if base_secs.is_finite() && base_secs >= 0.0 {
            Duration::from_secs_f64(base_secs)
        } else {
            self.max_delay
        };

        let base = base.min(self.max_delay);

        let jitter_factor = if self.jitter > 0.0 {
            rand::rng().random_range((1.0 - self.jitter).max(0.0)..=(1.0 + self.jitter))
        } else {
            1.0
        };

        let jittered_secs = (base.as_secs_f64() * jitter_factor).max(0.0);
        Duration::from_secs_f64(jittered_secs).min(self.max_delay)
    }
}

/// Rewrites the dial URI ahead of each reconnect attempt, e.g. to round-robin
/// across a pool of endpoints. Receives the current URI and the 1-indexed
/// attempt number.
pub type UriRewriteHook = Box<dyn Fn(&str, u32) -> String + Send + Sync>;

/// Supervises a client connection: dials, hands the live `WSConnection` to the
/// caller over a channel, waits for it to close, then reconnects with backoff.
pub struct ReconnectHandle {
    phase: Arc<AtomicU8>,
    attempt_counter: Arc<AtomicU32>,
    cancellation: CancellationToken,
    supervisor: tokio::task::JoinHandle<()>,
}

impl ReconnectHandle {
    /// Spawns the supervisor task and returns a handle plus a receiver that
    /// yields one `WSConnection` per successful (re)connect. `on_reconnecting`,
    /// if set, is called with `(uri, attempt)` before each redial and its
    /// return value becomes the next URI.
    pub fn start(
        uri: String,
        client_config: ClientConfig,
        on_reconnecting: Option<UriRewriteHook>,
    ) -> (Self, mpsc::Receiver<WSConnection>) {
        let (conn_tx, conn_rx) = mpsc::channel(4);
        let phase = Arc::new(AtomicU8::new(ReconnectPhase::Connecting as u8));
        let attempt_counter = Arc::new(AtomicU32::new(0));
        let cancellation = CancellationToken::new();

        let supervisor = tokio::spawn(run_supervisor(
            uri,
            client_config,
            conn_tx,
            phase.clone(),
            attempt_counter.clone(),
            cancellation.clone(),
            on_reconnecting,
        ));

        (
            Self {
                phase,
                attempt_counter,
                cancellation,
                supervisor,
            },
            conn_rx,
        )
    }

    pub fn phase(&self) -> ReconnectPhase {
        ReconnectPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_counter.load(Ordering::SeqCst)
    }

    /// Stops the supervisor: cancels any in-flight backoff sleep and prevents
    /// further reconnect attempts. Does not close an already-handed-off
    /// connection; the caller owns that `WSConnection` by this point.
    pub async fn stop(self) {
        self.phase
            .store(ReconnectPhase::Disconnecting as u8, Ordering::SeqCst);
        self.cancellation.cancel();
        let _ = self.supervisor.await;
    }
}

async fn run_supervisor(
    mut uri: String,
    client_config: ClientConfig,
    conn_tx: mpsc::Sender<WSConnection>,
    phase: Arc<AtomicU8>,
    attempt_counter: Arc<AtomicU32>,
    cancellation: CancellationToken,
    on_reconnecting: Option<UriRewriteHook>,
) {
    let reconnect_config = client_config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        if cancellation.is_cancelled() {
            phase.store(ReconnectPhase::Disconnected as u8, Ordering::SeqCst);
            return;
        }

        phase.store(ReconnectPhase::Connecting as u8, Ordering::SeqCst);

        match connect_async_with_config(&uri, Some(client_config.clone())).await {
            Ok(connection) => {
                attempt = 0;
                attempt_counter.store(0, Ordering::SeqCst);
                phase.store(ReconnectPhase::Connected as u8, Ordering::SeqCst);

                if conn_tx.send(connection).await.is_err() {
                    // Receiver dropped; nothing left to hand connections to.
                    phase.store(ReconnectPhase::Disconnected as u8, Ordering::SeqCst);
                    return;
                }
            }
            Err(error) => {
                log::warn!("reconnect: dial to {} failed: {}", uri, error);
            }
        }

        if !reconnect_config.enabled {
            phase.store(ReconnectPhase::Disconnected as u8, Ordering::SeqCst);
            return;
        }

        phase.store(ReconnectPhase::Reconnecting as u8, Ordering::SeqCst);
        attempt = attempt.saturating_add(1);
        attempt_counter.store(attempt, Ordering::SeqCst);

        if reconnect_config.max_attempts > 0 && attempt > reconnect_config.max_attempts {
            phase.store(ReconnectPhase::Failed as u8, Ordering::SeqCst);
            return;
        }

        let delay = reconnect_config.delay_for_attempt(attempt);

        if let Some(ref hook) = on_reconnecting {
            uri = hook(&uri, attempt);
        }

        tokio::select! {
            _ = cancellation.cancelled() => {
                phase.store(ReconnectPhase::Disconnected as u8, Ordering::SeqCst);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_and_respects_cap() {
        let config = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        };

        let first = config.delay_for_attempt(1);
        let second = config.delay_for_attempt(2);
        let third = config.delay_for_attempt(3);

        assert_eq!(first, Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(third, Duration::from_millis(400));
    }

    #[test]
    fn delay_clamps_to_max_even_with_huge_attempt_counts() {
        let config = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        };

        let delay = config.delay_for_attempt(10_000);
        assert_eq!(delay, config.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.5,
            max_attempts: 0,
        };

        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
