use crate::error::Result;
use crate::query::Query;
use crate::sink::BlockSink;
use async_trait::async_trait;

/// One streaming fan-out across every storage node.
#[async_trait]
pub trait QueryFanOut: Send + Sync {
    async fn fan_out(&self, query: &Query, sink: &dyn BlockSink) -> Result<()>;
}

/// Decides how a query is split into sub-queries before it is fanned out.
///
/// Implementations call [`QueryFanOut::fan_out`] once per sub-query and may
/// post-process the blocks before they reach `sink`.
#[async_trait]
pub trait NetQueryRunner: Send + Sync {
    async fn run(
        &self,
        query: &Query,
        fan_out: &dyn QueryFanOut,
        sink: &dyn BlockSink,
    ) -> Result<()>;
}

/// Runs the query as a single fan-out, unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRunner;

#[async_trait]
impl NetQueryRunner for DirectRunner {
    async fn run(
        &self,
        query: &Query,
        fan_out: &dyn QueryFanOut,
        sink: &dyn BlockSink,
    ) -> Result<()> {
        fan_out.fan_out(query, sink).await
    }
}
