//! Reload requests from outside the registry
//!
//! Requests are counted rather than toggled: every request bumps a generation
//! on a `watch` channel, so a receiver that falls behind still sees one change
//! and never needs the sender to reset the value.

use tokio::sync::watch;
use tracing::debug;

/// What asked for a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// SIGUSR2 was delivered to the process
    Signal,
    /// Requested in-process, for example from the host's input loop
    Manual,
}

/// Latest reload request seen on the channel
///
/// `generation` is zero until the first request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSignal {
    pub generation: u64,
    pub reason: Option<ReloadReason>,
}

impl ReloadSignal {
    pub fn is_requested(&self) -> bool {
        self.generation > 0
    }
}

/// Sending half of a reload channel; cheap to clone
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: watch::Sender<ReloadSignal>,
}

impl ReloadTrigger {
    /// Record a request; false once every receiver is gone
    pub fn request(&self, reason: ReloadReason) -> bool {
        self.tx.send_modify(|signal| {
            signal.generation += 1;
            signal.reason = Some(reason);
        });
        debug!(target: "registry", "Reload requested ({:?})", reason);
        !self.tx.is_closed()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReloadSignal> {
        self.tx.subscribe()
    }
}

/// A fresh reload channel with no pending request
pub fn reload_channel() -> (ReloadTrigger, watch::Receiver<ReloadSignal>) {
    let (tx, rx) = watch::channel(ReloadSignal::default());
    (ReloadTrigger { tx }, rx)
}

/// Forward SIGUSR2 to `trigger` until the receivers are dropped
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn forward_sigusr2(trigger: ReloadTrigger) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigusr2 = match signal(SignalKind::user_defined2()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(target: "registry", "Failed to register SIGUSR2 handler: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = trigger.tx.closed() => break,
                received = sigusr2.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!(target: "registry", "Received SIGUSR2, reloading extensions");
                    if !trigger.request(ReloadReason::Signal) {
                        break;
                    }
                }
            }
        }
        debug!(target: "registry", "SIGUSR2 forwarding stopped");
    });
}

#[cfg(not(unix))]
pub fn forward_sigusr2(_trigger: ReloadTrigger) {
    tracing::warn!(target: "registry", "SIGUSR2 reload not supported on this platform");
}

/// A reload channel fed by SIGUSR2
///
/// The trigger is returned too, so in-process requests share the channel.
pub fn setup_reload_signal() -> (ReloadTrigger, watch::Receiver<ReloadSignal>) {
    let (trigger, rx) = reload_channel();
    forward_sigusr2(trigger.clone());
    (trigger, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_bump_generation() {
        let (trigger, mut rx) = reload_channel();
        assert!(!rx.borrow().is_requested());

        assert!(trigger.request(ReloadReason::Manual));
        rx.changed().await.unwrap();
        let seen = *rx.borrow_and_update();
        assert_eq!(seen.generation, 1);
        assert_eq!(seen.reason, Some(ReloadReason::Manual));
    }

    #[tokio::test]
    async fn test_coalesced_requests_are_seen_once() {
        let (trigger, mut rx) = reload_channel();
        trigger.request(ReloadReason::Manual);
        trigger.request(ReloadReason::Signal);

        rx.changed().await.unwrap();
        let seen = *rx.borrow_and_update();
        assert_eq!(seen.generation, 2);
        assert_eq!(seen.reason, Some(ReloadReason::Signal));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_request_reports_dropped_receivers() {
        let (trigger, rx) = reload_channel();
        drop(rx);
        assert!(!trigger.request(ReloadReason::Manual));
    }
}
