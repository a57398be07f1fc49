//! SQL text tracing.
//!
//! Lines written:
//!
//! ```text
//! P: <statement> = <sql>        prepare
//! Q: <sql>                      simple or extended query
//! Q (<statement>): <sql>        execute of a prepared statement
//! Q: <statement>                lazy execute
//! Q: CALL: <function oid>       function call
//! ```
//!
//! Sink errors are discarded.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use parking_lot::Mutex;

#[derive(Default)]
struct TraceState {
    sink: Option<Box<dyn Write + Send>>,
    statements: HashMap<String, String>,
}

/// SQL trace for one session.
#[derive(Default)]
pub struct SqlTrace {
    state: Mutex<TraceState>,
}

impl SqlTrace {
    /// A trace writing to `sink`, or a disabled one.
    #[must_use]
    pub fn new(sink: Option<Box<dyn Write + Send>>) -> Self {
        Self {
            state: Mutex::new(TraceState {
                sink,
                statements: HashMap::new(),
            }),
        }
    }

    /// Replace the sink. Statement texts traced so far are kept.
    pub fn set_sink(&self, sink: Option<Box<dyn Write + Send>>) {
        self.state.lock().sink = sink;
    }

    /// Whether a sink is installed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// Trace a prepare and remember its text for later executes.
    pub fn prepare(&self, statement: &str, sql: &str) {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return;
        }
        state
            .statements
            .insert(statement.to_string(), sql.to_string());
        write_line(&mut state, format_args!("P: {statement} = {sql}"));
    }

    /// Trace a query.
    pub fn query(&self, sql: &str) {
        write_line(&mut self.state.lock(), format_args!("Q: {sql}"));
    }

    /// Trace an execute of a prepared statement with the text it was
    /// prepared with; empty if that prepare was not traced.
    pub fn execute(&self, statement: &str) {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return;
        }
        let sql = state.statements.get(statement).cloned().unwrap_or_default();
        write_line(&mut state, format_args!("Q ({statement}): {sql}"));
    }

    /// Trace a function call.
    pub fn call(&self, function: u32) {
        write_line(&mut self.state.lock(), format_args!("Q: CALL: {function}"));
    }

    /// Drop the remembered text of a closed statement.
    pub fn forget(&self, statement: &str) {
        self.state.lock().statements.remove(statement);
    }
}

impl fmt::Debug for SqlTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SqlTrace")
            .field("enabled", &state.sink.is_some())
            .field("statements", &state.statements.len())
            .finish()
    }
}

fn write_line(state: &mut TraceState, line: fmt::Arguments<'_>) {
    if let Some(sink) = state.sink.as_mut() {
        let _ = sink.write_fmt(format_args!("{line}\n"));
        let _ = sink.flush();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pg_testing::{FailingSink, TraceBuffer};

    #[test]
    fn test_prepare_then_execute() {
        let buffer = TraceBuffer::new();
        let trace = SqlTrace::new(Some(buffer.sink()));
        trace.prepare("S1", "SELECT 1");
        trace.query("SELECT 2");
        trace.execute("S1");
        assert_eq!(
            buffer.lines(),
            ["P: S1 = SELECT 1", "Q: SELECT 2", "Q (S1): SELECT 1"]
        );
    }

    #[test]
    fn test_unknown_statement_prints_empty_text() {
        let buffer = TraceBuffer::new();
        let trace = SqlTrace::new(Some(buffer.sink()));
        trace.execute("S9");
        trace.call(1598);
        assert_eq!(buffer.lines(), ["Q (S9): ", "Q: CALL: 1598"]);
    }

    #[test]
    fn test_forget_closed_statement() {
        let buffer = TraceBuffer::new();
        let trace = SqlTrace::new(Some(buffer.sink()));
        trace.prepare("S1", "SELECT 1");
        trace.forget("S1");
        trace.execute("S1");
        assert_eq!(buffer.lines().last().unwrap(), "Q (S1): ");
    }

    #[test]
    fn test_disabled_trace_writes_nothing() {
        let trace = SqlTrace::default();
        assert!(!trace.is_enabled());
        trace.prepare("S1", "SELECT 1");

        let buffer = TraceBuffer::new();
        trace.set_sink(Some(buffer.sink()));
        trace.execute("S1");
        assert_eq!(buffer.lines(), ["Q (S1): "]);
    }

    #[test]
    fn test_sink_errors_are_swallowed() {
        let trace = SqlTrace::new(Some(Box::new(FailingSink)));
        trace.prepare("S1", "SELECT 1");
        trace.query("SELECT 1");
        trace.execute("S1");
    }
}
