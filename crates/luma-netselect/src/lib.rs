//! Distributed select fan-out for LumaDB.
//!
//! A [`Coordinator`] sends one query to every storage node over HTTP and
//! reassembles the per-node results. Storage nodes answer through the
//! [`handler`] routes, which drive a local [`QueryEngine`] and frame its output
//! with the [`codec`] wire format.

pub mod block;
pub mod codec;
pub mod coordinator;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod handler;
pub mod merge;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod query;
pub mod runner;
pub mod sink;
pub mod stop;
pub mod tenant;
pub mod values;

pub use block::{BlockColumn, DataBlock};
pub use coordinator::{ClusterConfig, Coordinator};
pub use engine::memory::{LogRow, MemoryEngine};
pub use engine::QueryEngine;
pub use error::{Result, SelectError};
pub use handler::RequestHandler;
pub use merge::merge_values_with_hits;
pub use node::{AuthConfig, StorageNode};
pub use protocol::Endpoint;
pub use query::Query;
pub use runner::{DirectRunner, NetQueryRunner, QueryFanOut};
pub use sink::{sink_fn, BlockSink};
pub use stop::{stop_channel, StopContext, StopHandle, StopSignal};
pub use tenant::{TenantId, TenantScope};
pub use values::ValueWithHits;
