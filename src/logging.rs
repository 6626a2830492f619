use std::fmt;

/// Gate-scoped logging interface.
///
/// Every event carries the gate name (`proxy /users-pre`,
/// `backend /orders`, ...) as a structured `gate` field so that log lines from
/// concurrent exchanges can be told apart.
///
/// Diagnostics only: nothing in the pipeline branches on what is logged.
#[derive(Debug, Clone, Copy)]
pub struct GateLog<'a> {
    gate: &'a str,
}

impl<'a> GateLog<'a> {
    /// Creates a logger for the named gate.
    pub fn new(gate: &'a str) -> Self {
        Self { gate }
    }

    /// Returns the gate name attached to every event.
    pub fn gate(&self) -> &'a str {
        self.gate
    }

    /// Logs an info-level message.
    ///
    /// ```
    /// # use policy_gate::GateLog;
    /// let log = GateLog::new("proxy /users-pre");
    /// log.info(format_args!("evaluator #{} result: {}", 0, false));
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(gate = %self.gate, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(gate = %self.gate, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(gate = %self.gate, "{}", args);
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(gate = %self.gate, "{}", args);
    }
}
