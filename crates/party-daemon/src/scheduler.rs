use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::DaemonEvent;

/// Handle to a periodic task feeding the core event loop.  Cancelling (or
/// dropping) the handle stops the task; no event is sent once the token is
/// cancelled.
pub struct Ticker {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Send `make_event()` every `period`.  The first tick fires immediately.
    pub fn spawn<F>(
        name: &'static str,
        period: Duration,
        event_tx: mpsc::Sender<DaemonEvent>,
        make_event: F,
    ) -> Self
    where
        F: Fn() -> DaemonEvent + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        if child.is_cancelled() {
                            break;
                        }
                        if event_tx.send(make_event()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("ticker {} stopped", name);
        });
        Self {
            name,
            token,
            handle,
        }
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("cancelling ticker {}", self.name);
        }
        self.token.cancel();
        self.handle.abort();
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
