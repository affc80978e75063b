//! The local query engine a storage node drives when serving requests.

pub mod memory;

use crate::error::Result;
use crate::query::Query;
use crate::sink::BlockSink;
use crate::tenant::TenantScope;
use crate::values::ValueWithHits;
use async_trait::async_trait;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Runs `query` and hands every produced block to `sink`, tagged with the
    /// id of the engine worker that produced it.
    async fn run_query(
        &self,
        tenants: &TenantScope,
        query: &Query,
        sink: &dyn BlockSink,
    ) -> Result<()>;

    async fn field_names(&self, tenants: &TenantScope, query: &Query) -> Result<Vec<ValueWithHits>>;

    async fn field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>>;

    async fn stream_field_names(
        &self,
        tenants: &TenantScope,
        query: &Query,
    ) -> Result<Vec<ValueWithHits>>;

    async fn stream_field_values(
        &self,
        tenants: &TenantScope,
        query: &Query,
        field: &str,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>>;

    async fn streams(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>>;

    async fn stream_ids(
        &self,
        tenants: &TenantScope,
        query: &Query,
        limit: u64,
    ) -> Result<Vec<ValueWithHits>>;
}
