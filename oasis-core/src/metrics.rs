//! Metrics for the log-access layer

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(
        "oasis_dial_attempts_total",
        "Dial attempts against the log store, by outcome"
    );
    describe_counter!(
        "oasis_rpc_calls_total",
        "Requests issued to the log store, by method, kind and outcome"
    );
    describe_histogram!(
        "oasis_rpc_call_duration_seconds",
        "Time until a single-value call returned, by method"
    );
    describe_counter!(
        "oasis_redactions_total",
        "Messages replaced by a placeholder, by reason"
    );
    describe_counter!(
        "oasis_records_skipped_total",
        "Stream records dropped because they could not be decoded"
    );
    describe_counter!(
        "oasis_thread_replies_skipped_total",
        "Thread replies dropped because they could not be decoded"
    );
}

/// Request kind label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Call,
    Stream,
}

impl RequestKind {
    fn label(&self) -> &'static str {
        match self {
            RequestKind::Call => "call",
            RequestKind::Stream => "stream",
        }
    }
}

/// Measures one request and records it when finished
pub struct RequestTimer {
    method: &'static str,
    kind: RequestKind,
    start: Instant,
}

impl RequestTimer {
    pub fn start(method: &'static str, kind: RequestKind) -> Self {
        Self {
            method,
            kind,
            start: Instant::now(),
        }
    }

    /// Record the outcome; durations are only kept for calls, since a stream's lifetime is up to its consumer
    pub fn finish(self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        counter!(
            "oasis_rpc_calls_total",
            "method" => self.method,
            "kind" => self.kind.label(),
            "outcome" => outcome
        )
        .increment(1);

        if self.kind == RequestKind::Call {
            histogram!("oasis_rpc_call_duration_seconds", "method" => self.method)
                .record(self.start.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // Without an installed recorder this only has to not panic
        init_metrics();
    }

    #[test]
    fn test_timer() {
        let timer = RequestTimer::start("whoami", RequestKind::Call);
        timer.finish(true);
        RequestTimer::start("conn.peers", RequestKind::Stream).finish(false);
    }
}
