use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::{BoundCallback, BoundPredicate};
use crate::error::ScheduleError;

/// Event condition that starts or stops a service
#[derive(Debug, Clone)]
pub struct EventGate {
    pub event: String,
    pub once: bool,
    pub source: Option<String>,
    /// Evaluated with the event arguments; absent means always satisfied
    pub predicate: Option<BoundPredicate>,
}

/// Parse a cron expression
///
/// Five-field expressions (minute resolution) get a zero seconds field
/// prepended; six and seven field expressions are used as they are.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };

    Schedule::from_str(&normalized).map_err(|source| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        source,
    })
}

/// The work done on every scheduled tick
struct Ticker {
    id: String,
    callback: BoundCallback,
    gate: Option<BoundPredicate>,
}

impl Ticker {
    fn tick(&self) -> bool {
        if let Some(gate) = &self.gate {
            match gate.call(&[]) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "services", "Service {} skipped tick, gate closed", self.id);
                    return false;
                }
                Err(e) => {
                    error!(target: "services", "Service {} gate failed: {:#}", self.id, e);
                    return false;
                }
            }
        }

        match self.callback.call(&[]) {
            Ok(()) => true,
            Err(e) => {
                error!(target: "services", "Service {} failed: {:#}", self.id, e);
                false
            }
        }
    }
}

/// A scheduled service
///
/// Holds at most one running schedule task. `start` and `stop` are
/// idempotent, and failures inside a tick never cancel later ticks.
pub struct Service {
    expression: String,
    schedule: Schedule,
    ticker: Arc<Ticker>,
    startup: Option<EventGate>,
    shutdown: Option<EventGate>,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    pub fn new(
        id: impl Into<String>,
        expression: &str,
        callback: BoundCallback,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            expression: expression.to_string(),
            schedule: parse_schedule(expression)?,
            ticker: Arc::new(Ticker {
                id: id.into(),
                callback,
                gate: None,
            }),
            startup: None,
            shutdown: None,
            job: Mutex::new(None),
        })
    }

    /// Set the pre-run gate evaluated before every tick
    pub fn with_gate(mut self, gate: BoundPredicate) -> Self {
        if let Some(ticker) = Arc::get_mut(&mut self.ticker) {
            ticker.gate = Some(gate);
        }
        self
    }

    /// Start the service when `gate` fires instead of on load
    pub fn with_startup(mut self, gate: EventGate) -> Self {
        self.startup = Some(gate);
        self
    }

    pub fn with_shutdown(mut self, gate: EventGate) -> Self {
        self.shutdown = Some(gate);
        self
    }

    pub fn id(&self) -> &str {
        &self.ticker.id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn handler(&self) -> &str {
        self.ticker.callback.label()
    }

    pub fn startup(&self) -> Option<&EventGate> {
        self.startup.as_ref()
    }

    pub fn shutdown(&self) -> Option<&EventGate> {
        self.shutdown.as_ref()
    }

    /// Services with a startup trigger wait for it instead of starting on load
    pub fn autostart(&self) -> bool {
        self.startup.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the schedule. Returns false if it was already running or no
    /// async runtime is available.
    pub fn start(&self) -> bool {
        let mut job = self.job.lock();
        if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(target: "services", "Cannot start service {}: {}", self.id(), e);
                return false;
            }
        };

        let schedule = self.schedule.clone();
        let ticker = self.ticker.clone();
        *job = Some(runtime.spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = schedule.after(&now).next() else {
                    warn!(target: "services", "Service {} has no upcoming ticks", ticker.id);
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                ticker.tick();
            }
        }));

        info!(target: "services", "Service {} started ({})", self.id(), self.expression);
        true
    }

    /// Cancel the schedule. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.job.lock().take() else {
            return false;
        };
        handle.abort();
        info!(target: "services", "Service {} stopped", self.id());
        true
    }

    /// Run one tick immediately: the gate, then the callback
    ///
    /// Returns true if the callback ran and succeeded.
    pub fn run_once(&self) -> bool {
        self.ticker.tick()
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(handle) = self.job.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id())
            .field("expression", &self.expression)
            .field("autostart", &self.autostart())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counting_callback(count: Arc<AtomicUsize>) -> BoundCallback {
        BoundCallback::from_fn("count", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_parse_five_and_six_field_expressions() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("*/10 * * * * *").is_ok());
        assert!(parse_schedule("not a schedule").is_err());
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        let err = Service::new("broken", "61 * * * *", counting_callback(Default::default()))
            .unwrap_err();
        assert!(err.to_string().contains("61 * * * *"));
    }

    #[test]
    fn test_autostart_follows_startup_trigger() {
        let service = Service::new("s", "* * * * *", counting_callback(Default::default())).unwrap();
        assert!(service.autostart());

        let service = service.with_startup(EventGate {
            event: "ready".to_string(),
            once: true,
            source: None,
            predicate: None,
        });
        assert!(!service.autostart());
    }

    #[test]
    fn test_gate_blocks_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(false));
        let o = open.clone();
        let service = Service::new("gated", "* * * * *", counting_callback(count.clone()))
            .unwrap()
            .with_gate(BoundPredicate::from_fn("open", move |_| Ok(o.load(Ordering::SeqCst))));

        assert!(!service.run_once());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        open.store(true, Ordering::SeqCst);
        assert!(service.run_once());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_are_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let service = Service::new(
            "flaky",
            "* * * * *",
            BoundCallback::from_fn("flaky", move |_| {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first tick fails");
                }
                Ok(())
            }),
        )
        .unwrap();

        assert!(!service.run_once());
        assert!(service.run_once());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let broken_gate = Service::new("g", "* * * * *", counting_callback(Default::default()))
            .unwrap()
            .with_gate(BoundPredicate::from_fn("boom", |_| panic!("gate exploded")));
        assert!(!broken_gate.run_once());
    }

    #[test]
    fn test_start_without_runtime_fails_closed() {
        let service = Service::new("s", "* * * * *", counting_callback(Default::default())).unwrap();
        assert!(!service.start());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let service = Service::new("s", "* * * * *", counting_callback(Default::default())).unwrap();

        assert!(service.start());
        assert!(!service.start());
        assert!(service.is_running());

        assert!(service.stop());
        assert!(!service.stop());
        assert!(!service.is_running());

        // Can be started again after stopping
        assert!(service.start());
        assert!(service.stop());
    }

    #[tokio::test]
    async fn test_scheduled_ticks_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let service = Service::new("fast", "* * * * * *", counting_callback(count.clone())).unwrap();

        service.start();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        service.stop();

        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
