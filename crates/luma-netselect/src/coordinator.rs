//! Fan-out of select operations across every storage node.

use crate::error::{Result, SelectError};
use crate::merge::merge_values_with_hits;
use crate::metrics;
use crate::node::{AuthConfig, ClusterShared, StorageNode};
use crate::protocol::{Endpoint, PARAM_FIELD, PARAM_LIMIT};
use crate::query::Query;
use crate::runner::{DirectRunner, NetQueryRunner, QueryFanOut};
use crate::sink::BlockSink;
use crate::stop::{StopContext, StopSignal};
use crate::tenant::TenantScope;
use crate::values::ValueWithHits;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Storage node addresses as `host:port`.
    pub nodes: Vec<String>,
    pub tls: bool,
    pub disable_compression: bool,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub auth: AuthConfig,
}

pub struct Coordinator {
    nodes: Vec<Arc<StorageNode>>,
    runner: Arc<dyn NetQueryRunner>,
    stopped: AtomicBool,
}

impl Coordinator {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let shared = Arc::new(ClusterShared {
            disable_compression: config.disable_compression,
        });
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for addr in &config.nodes {
            let addr = addr.trim();
            if addr.is_empty() {
                return Err(SelectError::Config("empty storage node address".into()));
            }
            nodes.push(Arc::new(StorageNode::new(
                addr.to_string(),
                config.tls,
                client.clone(),
                config.auth.clone(),
                shared.clone(),
            )));
        }

        Ok(Self {
            nodes,
            runner: Arc::new(DirectRunner),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn NetQueryRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.addr())
    }

    /// Marks the coordinator stopped. Calls already past node selection run
    /// to completion; later calls fail with [`SelectError::Stopped`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn live_nodes(&self) -> Result<Vec<Arc<StorageNode>>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SelectError::Stopped);
        }
        Ok(self.nodes.clone())
    }

    /// Runs `query` on every node and streams the decoded blocks into
    /// `sink`, tagged with the index of the node they came from.
    ///
    /// The first node failure cancels the other nodes. When `stop` fires the
    /// call returns `Ok(())` with whatever was already delivered.
    pub async fn run_query(
        &self,
        stop: &StopSignal,
        tenants: &TenantScope,
        query: &Query,
        sink: &dyn BlockSink,
    ) -> Result<()> {
        let nodes = self.live_nodes()?;
        let ctx = stop.context();
        let fan_out = StreamFanOut {
            nodes: &nodes,
            tenants,
            ctx: &ctx,
        };
        self.runner.run(query, &fan_out, sink).await
    }

    pub async fn field_names(
        &self,
        tenants: &TenantScope,
        query: &Query,
    ) -> Result<Vec<ValueWithHits>> {
        let lists = self
            .collect_values(Endpoint::FieldNames, tenants, query, Vec::new())
            .await?;
        Ok(merge_values_with_hits(lists, 0, false))
    }

    pub async fn field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        let extra = vec![
            (PARAM_FIELD, field.to_string()),
            (PARAM_LIMIT, limit.to_string()),
        ];
        let lists = self
            .collect_values(Endpoint::FieldValues, tenants, query, extra)
            .await?;
        Ok(merge_values_with_hits(lists, limit, true))
    }

    pub async fn stream_field_names(
        &self,
        tenants: &TenantScope,
        query: &Query,
    ) -> Result<Vec<ValueWithHits>> {
        let lists = self
            .collect_values(Endpoint::StreamFieldNames, tenants, query, Vec::new())
            .await?;
        Ok(merge_values_with_hits(lists, 0, false))
    }

    pub async fn stream_field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        let extra = vec![
            (PARAM_FIELD, field.to_string()),
            (PARAM_LIMIT, limit.to_string()),
        ];
        let lists = self
            .collect_values(Endpoint::StreamFieldValues, tenants, query, extra)
            .await?;
        Ok(merge_values_with_hits(lists, limit, true))
    }

    pub async fn streams(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        let extra = vec![(PARAM_LIMIT, limit.to_string())];
        let lists = self
            .collect_values(Endpoint::Streams, tenants, query, extra)
            .await?;
        Ok(merge_values_with_hits(lists, limit, true))
    }

    pub async fn stream_ids(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>> {
        let extra = vec![(PARAM_LIMIT, limit.to_string())];
        let lists = self
            .collect_values(Endpoint::StreamIds, tenants, query, extra)
            .await?;
        Ok(merge_values_with_hits(lists, limit, true))
    }

    /// Fetches one value list per node. The cancellation token here is not
    /// tied to any stop signal; it only shortens the call after a failure.
    async fn collect_values(
        &self,
        endpoint: Endpoint,
        tenants: &TenantScope,
        query: &Query,
        extra: Vec<(&'static str, String)>,
    ) -> Result<Vec<Vec<ValueWithHits>>> {
        let nodes = self.live_nodes()?;
        debug!(op = endpoint.name(), nodes = nodes.len(), "fanning out value request");

        let token = CancellationToken::new();
        let first_failure = OnceLock::new();
        let tasks = nodes.iter().enumerate().map(|(shard, node)| {
            guarded(
                endpoint,
                shard,
                node.addr(),
                &token,
                &first_failure,
                node.get_values(endpoint, tenants, query, &extra),
            )
        });
        collect_shard_results(join_all(tasks).await)
    }
}

struct StreamFanOut<'a> {
    nodes: &'a [Arc<StorageNode>],
    tenants: &'a TenantScope,
    ctx: &'a StopContext,
}

#[async_trait]
impl<'a> QueryFanOut for StreamFanOut<'a> {
    async fn fan_out(&self, query: &Query, sink: &dyn BlockSink) -> Result<()> {
        debug!(nodes = self.nodes.len(), query = %query, "fanning out query");
        let token = self.ctx.with_cancel();
        let first_failure = OnceLock::new();
        let tasks = self.nodes.iter().enumerate().map(|(shard, node)| {
            guarded(
                Endpoint::Query,
                shard,
                node.addr(),
                &token,
                &first_failure,
                node.run_query(self.tenants, query, shard, sink),
            )
        });
        match collect_shard_results(join_all(tasks).await) {
            Ok(_) => Ok(()),
            Err(err) if err.is_canceled() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Runs one node's part of a fan-out under the shared cancellation token.
/// A failure cancels the token so the sibling nodes unwind early.
async fn guarded<T, F>(
    op: Endpoint,
    shard: usize,
    addr: &str,
    token: &CancellationToken,
    first_failure: &OnceLock<usize>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    metrics::SHARD_REQUESTS_TOTAL
        .with_label_values(&[op.name()])
        .inc();
    let result = tokio::select! {
        _ = token.cancelled() => Err(SelectError::Canceled),
        result = fut => result,
    };
    if let Err(err) = &result {
        if !err.is_canceled() {
            metrics::SHARD_ERRORS_TOTAL
                .with_label_values(&[op.name()])
                .inc();
            if first_failure.set(shard).is_ok() {
                warn!(
                    op = op.name(),
                    shard,
                    addr,
                    error = %err,
                    "storage node failed; canceling the rest"
                );
            } else {
                debug!(op = op.name(), shard, addr, error = %err, "storage node failed");
            }
        }
        token.cancel();
    }
    result
}

/// Picks the call result from per-node results in node order.
///
/// The first error that is not a cancellation wins. Cancellations are only
/// reported when nothing else failed.
fn collect_shard_results<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut canceled = None;
    for result in results {
        match result {
            Ok(v) => values.push(v),
            Err(err) if err.is_canceled() => {
                canceled.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    match canceled {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
