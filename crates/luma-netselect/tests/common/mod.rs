#![allow(dead_code)]

use async_trait::async_trait;
use luma_netselect::handler::routes;
use luma_netselect::{
    BlockSink, ClusterConfig, Coordinator, DataBlock, LogRow, MemoryEngine, Query, QueryEngine,
    RequestHandler, Result, SelectError, TenantId, TenantScope, ValueWithHits,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn tenant() -> TenantId {
    TenantId::new(0, 0)
}

pub fn scope() -> TenantScope {
    TenantScope::single(tenant())
}

pub fn query(text: &str) -> Query {
    Query::parse(text, i64::MAX).unwrap()
}

/// Starts a storage node serving `engine` on an ephemeral port.
pub fn spawn_node(engine: Arc<dyn QueryEngine>, flush_threshold: usize) -> SocketAddr {
    let handler = Arc::new(RequestHandler::new(engine).with_flush_threshold(flush_threshold));
    let (addr, server) = warp::serve(routes(handler)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

pub fn coordinator(addrs: &[SocketAddr], disable_compression: bool) -> Coordinator {
    let config = ClusterConfig {
        nodes: addrs.iter().map(|a| a.to_string()).collect(),
        disable_compression,
        request_timeout_secs: Some(30),
        ..ClusterConfig::default()
    };
    Coordinator::new(&config).unwrap()
}

/// Rows tagged with `node` in the `node` field and numbered in `_msg`.
pub fn engine_with_rows(node: &str, count: usize) -> Arc<MemoryEngine> {
    let rows = (0..count)
        .map(|i| {
            LogRow::new(tenant(), i as i64)
                .with_stream("app", node)
                .with_field("node", node)
                .with_field("_msg", &format!("{node} message {i}"))
        })
        .collect();
    Arc::new(MemoryEngine::from_rows(rows).with_block_rows(7))
}

/// Fails every request with an engine error carrying `message`.
pub struct FailingEngine {
    pub message: String,
}

impl FailingEngine {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }

    fn fail<T>(&self) -> Result<T> {
        Err(SelectError::Engine(self.message.clone()))
    }
}

#[async_trait]
impl QueryEngine for FailingEngine {
    async fn run_query(&self, _: &TenantScope, _: &Query, _: &dyn BlockSink) -> Result<()> {
        self.fail()
    }
    async fn field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
    async fn field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
    async fn stream_field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
    async fn stream_field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
    async fn streams(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
    async fn stream_ids(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        self.fail()
    }
}

/// Never answers.
pub struct HangingEngine;

#[async_trait]
impl QueryEngine for HangingEngine {
    async fn run_query(&self, _: &TenantScope, _: &Query, _: &dyn BlockSink) -> Result<()> {
        std::future::pending().await
    }
    async fn field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
    async fn field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
    async fn stream_field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
    async fn stream_field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
    async fn streams(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
    async fn stream_ids(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        std::future::pending().await
    }
}

/// Counts how often the wrapped engine is invoked.
pub struct CountingEngine {
    pub inner: Arc<MemoryEngine>,
    pub calls: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: Arc<MemoryEngine>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueryEngine for CountingEngine {
    async fn run_query(&self, t: &TenantScope, q: &Query, sink: &dyn BlockSink) -> Result<()> {
        self.hit();
        self.inner.run_query(t, q, sink).await
    }
    async fn field_names(&self, t: &TenantScope, q: &Query) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.field_names(t, q).await
    }
    async fn field_values(
        &self,
        t: &TenantScope,
        q: &Query,
        f: &str,
        l: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.field_values(t, q, f, l).await
    }
    async fn stream_field_names(&self, t: &TenantScope, q: &Query) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.stream_field_names(t, q).await
    }
    async fn stream_field_values(
        &self,
        t: &TenantScope,
        q: &Query,
        f: &str,
        l: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.stream_field_values(t, q, f, l).await
    }
    async fn streams(&self, t: &TenantScope, q: &Query, l: u64) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.streams(t, q, l).await
    }
    async fn stream_ids(&self, t: &TenantScope, q: &Query, l: u64) -> Result<Vec<ValueWithHits>> {
        self.hit();
        self.inner.stream_ids(t, q, l).await
    }
}

/// How a [`PartialEngine`] ends its query once its blocks are written.
#[derive(Debug, Clone, Copy)]
pub enum Ending {
    Fail,
    Panic,
}

/// Emits `blocks` blocks of 50 rows, then fails or panics.
pub struct PartialEngine {
    pub blocks: usize,
    pub ending: Ending,
}

impl PartialEngine {
    pub fn new(blocks: usize, ending: Ending) -> Arc<Self> {
        Arc::new(Self { blocks, ending })
    }

    fn unsupported<T>(&self) -> Result<T> {
        Err(SelectError::Engine("value lists are not supported".into()))
    }
}

#[async_trait]
impl QueryEngine for PartialEngine {
    async fn run_query(&self, _: &TenantScope, _: &Query, sink: &dyn BlockSink) -> Result<()> {
        for b in 0..self.blocks {
            let mut block = DataBlock::new();
            block.add_column("_msg", (0..50).map(|i| format!("block {b} row {i}")).collect())?;
            sink.write_block(0, &block).await?;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        match self.ending {
            Ending::Fail => Err(SelectError::Engine("disk went away".into())),
            Ending::Panic => panic!("engine bug after {} blocks", self.blocks),
        }
    }
    async fn field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
    async fn field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
    async fn stream_field_names(&self, _: &TenantScope, _: &Query) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
    async fn stream_field_values(
        &self,
        _: &TenantScope,
        _: &Query,
        _: &str,
        _: u64,
    ) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
    async fn streams(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
    async fn stream_ids(&self, _: &TenantScope, _: &Query, _: u64) -> Result<Vec<ValueWithHits>> {
        self.unsupported()
    }
}
