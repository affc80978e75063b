//! In-memory query engine over a fixed set of log rows.
//!
//! The filter language is deliberately tiny: whitespace separated terms that
//! must all match, where `*` matches any row, `name:value` matches an exact
//! field (or stream label) value and any other word must occur in `_msg`.

use crate::block::DataBlock;
use crate::engine::QueryEngine;
use crate::error::{Result, SelectError};
use crate::merge::merge_values_with_hits;
use crate::query::Query;
use crate::sink::BlockSink;
use crate::tenant::{TenantId, TenantScope};
use crate::values::ValueWithHits;
use async_trait::async_trait;
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use xxhash_rust::xxh3::xxh3_128;

const DEFAULT_BLOCK_ROWS: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(default)]
    pub tenant: TenantId,
    /// Unix nanoseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub stream: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl LogRow {
    pub fn new(tenant: TenantId, timestamp: i64) -> Self {
        Self {
            tenant,
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, name: &str, value: &str) -> Self {
        self.stream.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    /// `{label="value",...}` with labels in sorted order.
    pub fn stream_string(&self) -> String {
        let labels: Vec<String> = self
            .stream
            .iter()
            .map(|(k, v)| format!("{}={:?}", k, v))
            .collect();
        format!("{{{}}}", labels.join(","))
    }

    pub fn stream_id(&self) -> String {
        format!(
            "{:08x}{:08x}{:032x}",
            self.tenant.account_id,
            self.tenant.project_id,
            xxh3_128(self.stream_string().as_bytes())
        )
    }

    pub fn time_string(&self) -> String {
        Utc.timestamp_nanos(self.timestamp)
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn field_value(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "_time" => Some(Cow::Owned(self.time_string())),
            "_stream" => Some(Cow::Owned(self.stream_string())),
            "_stream_id" => Some(Cow::Owned(self.stream_id())),
            other => self
                .fields
                .get(other)
                .or_else(|| self.stream.get(other))
                .map(|v| Cow::Borrowed(v.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    All,
    FieldEq(String, String),
    Word(String),
}

impl Term {
    fn parse(token: &str) -> Self {
        if token == "*" {
            return Term::All;
        }
        match token.split_once(':') {
            Some((name, value)) if !name.is_empty() => {
                Term::FieldEq(name.to_string(), value.trim_matches('"').to_string())
            }
            _ => Term::Word(token.trim_matches('"').to_string()),
        }
    }

    fn matches(&self, row: &LogRow) -> bool {
        match self {
            Term::All => true,
            Term::FieldEq(name, value) => row
                .field_value(name)
                .is_some_and(|v| v == value.as_str()),
            Term::Word(word) => row
                .fields
                .get("_msg")
                .is_some_and(|msg| msg.contains(word.as_str())),
        }
    }
}

fn parse_filter(query: &Query) -> Vec<Term> {
    query.text().split_whitespace().map(Term::parse).collect()
}

pub struct MemoryEngine {
    rows: RwLock<Vec<LogRow>>,
    block_rows: usize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::from_rows(Vec::new())
    }

    pub fn from_rows(rows: Vec<LogRow>) -> Self {
        Self {
            rows: RwLock::new(rows),
            block_rows: DEFAULT_BLOCK_ROWS,
        }
    }

    /// Maximum number of rows per emitted data block.
    pub fn with_block_rows(mut self, block_rows: usize) -> Self {
        self.block_rows = block_rows.max(1);
        self
    }

    /// Loads rows from a file holding one JSON-encoded [`LogRow`] per line.
    pub fn load_json_lines(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: LogRow = serde_json::from_str(line).map_err(|e| {
                SelectError::Config(format!("{}:{}: {}", path.display(), i + 1, e))
            })?;
            rows.push(row);
        }
        tracing::debug!(path = %path.display(), rows = rows.len(), "parsed json lines");
        Ok(Self::from_rows(rows))
    }

    pub async fn push(&self, row: LogRow) {
        self.rows.write().await.push(row);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn matching(&self, tenants: &TenantScope, query: &Query) -> Vec<LogRow> {
        let terms = parse_filter(query);
        let rows = self.rows.read().await;
        let mut matched: Vec<LogRow> = rows
            .iter()
            .filter(|r| tenants.contains(&r.tenant))
            .filter(|r| r.timestamp <= query.timestamp())
            .filter(|r| terms.iter().all(|t| t.matches(r)))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.timestamp);
        matched
    }

    async fn count_by<F>(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
        reset_hits: bool,
        keys: F,
    ) -> Vec<ValueWithHits>
    where
        F: Fn(&LogRow) -> Vec<String>,
    {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for row in self.matching(tenants, query).await {
            for key in keys(&row) {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        let values = counts
            .into_iter()
            .map(|(value, hits)| ValueWithHits { value, hits })
            .collect();
        merge_values_with_hits(vec![values], limit, reset_hits)
    }
}

fn build_block(rows: &[LogRow]) -> Result<DataBlock> {
    let mut block = DataBlock::new();
    block.add_column("_time", rows.iter().map(LogRow::time_string).collect())?;
    block.add_column("_stream_id", rows.iter().map(LogRow::stream_id).collect())?;
    block.add_column("_stream", rows.iter().map(LogRow::stream_string).collect())?;

    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();
    for name in names {
        let values = rows
            .iter()
            .map(|r| r.fields.get(name).cloned().unwrap_or_default())
            .collect();
        block.add_column(name, values)?;
    }
    Ok(block)
}

#[async_trait]
impl QueryEngine for MemoryEngine {
    async fn run_query(
        &self,
        tenants: &TenantScope,
        query: &Query,
        sink: &dyn BlockSink,
    ) -> Result<()> {
        let rows = self.matching(tenants, query).await;
        let chunks: Vec<&[LogRow]> = rows.chunks(self.block_rows).collect();
        let workers = query.concurrency();

        let tasks = (0..workers).map(|worker| {
            let chunks = &chunks;
            async move {
                for chunk in chunks.iter().skip(worker).step_by(workers) {
                    let block = build_block(chunk)?;
                    sink.write_block(worker, &block).await?;
                }
                Ok::<(), SelectError>(())
            }
        });
        futures::future::try_join_all(tasks).await?;
        Ok(())
    }

    async fn field_names(
        &self,
        tenants: &TenantScope,
        query: &Query,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, 0, false, |row| {
                ["_time", "_stream", "_stream_id"]
                    .into_iter()
                    .map(String::from)
                    .chain(row.fields.keys().cloned())
                    .collect()
            })
            .await)
    }

    async fn field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, limit, true, |row| {
                vec![row.field_value(field).map(Cow::into_owned).unwrap_or_default()]
            })
            .await)
    }

    async fn stream_field_names(
        &self,
        tenants: &TenantScope,
        query: &Query,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, 0, false, |row| row.stream.keys().cloned().collect())
            .await)
    }

    async fn stream_field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, limit, true, |row| {
                row.stream.get(field).cloned().into_iter().collect()
            })
            .await)
    }

    async fn streams(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, limit, true, |row| vec![row.stream_string()])
            .await)
    }

    async fn stream_ids(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        Ok(self
            .count_by(tenants, query, limit, true, |row| vec![row.stream_id()])
            .await)
    }
}
