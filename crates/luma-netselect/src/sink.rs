use crate::block::DataBlock;
use crate::error::Result;
use async_trait::async_trait;

/// Receives data blocks tagged with the id of the producer.
///
/// On the coordinator side the id is the shard index; inside a storage node
/// it is the query engine's worker id. Blocks from one producer arrive in
/// production order; blocks from different producers may interleave. The
/// block is only valid for the duration of the call.
#[async_trait]
pub trait BlockSink: Send + Sync {
    async fn write_block(&self, id: usize, block: &DataBlock) -> Result<()>;
}

/// Adapts a plain closure into a [`BlockSink`].
pub struct FnSink<F> {
    f: F,
}

pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(usize, &DataBlock) -> Result<()> + Send + Sync,
{
    FnSink { f }
}

#[async_trait]
impl<F> BlockSink for FnSink<F>
where
    F: Fn(usize, &DataBlock) -> Result<()> + Send + Sync,
{
    async fn write_block(&self, id: usize, block: &DataBlock) -> Result<()> {
        (self.f)(id, block)
    }
}
