use crate::error::{Result, SelectError};
use std::fmt;

/// A query as seen by the fan-out layer.
///
/// The query language itself is not interpreted here: the text is
/// trimmed and forwarded to storage nodes together with the evaluation
/// timestamp (Unix nanoseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    timestamp: i64,
    concurrency: usize,
}

impl Query {
    pub fn parse(text: &str, timestamp: i64) -> Result<Self> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SelectError::bad_param("query", "query must not be empty"));
        }
        Ok(Self {
            text,
            timestamp,
            concurrency: num_cpus::get().max(1),
        })
    }

    /// Parses `text` and evaluates it at the current time.
    pub fn now(text: &str) -> Result<Self> {
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        Self::parse(text, timestamp)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Canonical form; this is also what goes on the wire.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
