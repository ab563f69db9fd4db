//! The proxy adapter — request-context services for handlers.
//!
//! Carries the log sink, response formatting, and the monotonic
//! remaining-execution-time countdown that every bounded waiter consults.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

/// Log severity for the proxy log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The response envelope handed back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    /// When set, the transport must treat the body as maskable secret
    /// material (license content).
    pub secret: bool,
}

/// Request-context services: log sink, response formatting, deadline clock.
pub trait ProxyAdapter: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str);

    fn log_debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    fn log_info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    fn log_warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }

    fn log_error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }

    fn format_response(&self, status: u16, body: &str, secret: bool) -> Response {
        Response {
            status,
            body: body.to_string(),
            secret,
        }
    }

    /// Milliseconds left before the runtime reclaims this handler.
    /// Bounded waiters exit at least 6000 ms before expiry.
    fn remaining_execution_time_ms(&self) -> u64;
}

/// Proxy adapter forwarding logs to `tracing`, with a wall-clock
/// execution budget.
pub struct TracingProxy {
    deadline: Instant,
}

impl TracingProxy {
    /// A proxy whose countdown starts at `budget` from now.
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    /// A proxy with an effectively unlimited budget (background callers).
    pub fn unbounded() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

impl ProxyAdapter for TracingProxy {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => debug!("{msg}"),
            LogLevel::Info => info!("{msg}"),
            LogLevel::Warn => warn!("{msg}"),
            LogLevel::Error => error!("{msg}"),
        }
    }

    fn remaining_execution_time_ms(&self) -> u64 {
        self.deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_decreases() {
        let proxy = TracingProxy::new(Duration::from_millis(500));
        let first = proxy.remaining_execution_time_ms();
        assert!(first <= 500);
        std::thread::sleep(Duration::from_millis(20));
        assert!(proxy.remaining_execution_time_ms() < first);
    }

    #[test]
    fn exhausted_budget_reads_zero() {
        let proxy = TracingProxy::new(Duration::from_millis(0));
        assert_eq!(proxy.remaining_execution_time_ms(), 0);
    }

    #[test]
    fn format_response_passthrough() {
        let proxy = TracingProxy::unbounded();
        let resp = proxy.format_response(200, "", false);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "");
        assert!(!resp.secret);
    }
}
