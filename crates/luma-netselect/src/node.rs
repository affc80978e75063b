//! HTTP client for a single storage node.

use crate::block::{BlockReader, DataBlock};
use crate::codec::{self, FrameDecoder};
use crate::error::{Result, SelectError};
use crate::protocol::{
    Endpoint, PARAM_DISABLE_COMPRESSION, PARAM_QUERY, PARAM_TENANT_IDS, PARAM_TIMESTAMP,
    PARAM_VERSION,
};
use crate::query::Query;
use crate::sink::BlockSink;
use crate::tenant::TenantScope;
use crate::values::{unmarshal_values_with_hits, ValueWithHits};
use futures::TryStreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Credentials attached to every request sent to storage nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
}

impl AuthConfig {
    pub fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.bearer_token {
            req.bearer_auth(token)
        } else if let Some(username) = &self.username {
            req.basic_auth(username, self.password.as_ref())
        } else {
            req
        }
    }
}

/// Settings shared by every node of one coordinator.
#[derive(Debug)]
pub(crate) struct ClusterShared {
    pub(crate) disable_compression: bool,
}

pub struct StorageNode {
    addr: String,
    scheme: &'static str,
    client: reqwest::Client,
    auth: AuthConfig,
    shared: Arc<ClusterShared>,
}

impl StorageNode {
    pub(crate) fn new(
        addr: String,
        tls: bool,
        client: reqwest::Client,
        auth: AuthConfig,
        shared: Arc<ClusterShared>,
    ) -> Self {
        Self {
            addr,
            scheme: if tls { "https" } else { "http" },
            client,
            auth,
            shared,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}://{}{}", self.scheme, self.addr, endpoint.path())
    }

    fn compressed(&self) -> bool {
        !self.shared.disable_compression
    }

    fn request(
        &self,
        endpoint: Endpoint,
        tenants: &TenantScope,
        query: &Query,
        extra: &[(&'static str, String)],
    ) -> RequestBuilder {
        let params = [
            (PARAM_VERSION, endpoint.protocol_version().to_string()),
            (PARAM_TENANT_IDS, tenants.encode()),
            (PARAM_QUERY, query.to_string()),
            (PARAM_TIMESTAMP, query.timestamp().to_string()),
            (
                PARAM_DISABLE_COMPRESSION,
                self.shared.disable_compression.to_string(),
            ),
        ];
        let req = self.client.get(self.url(endpoint)).query(&params).query(extra);
        self.auth.apply(req)
    }

    /// Streams the query results from this node into `sink`, tagging every
    /// block with `shard`.
    pub async fn run_query(
        &self,
        tenants: &TenantScope,
        query: &Query,
        shard: usize,
        sink: &dyn BlockSink,
    ) -> Result<()> {
        let url = self.url(Endpoint::Query);
        self.stream_blocks(tenants, query, shard, sink)
            .await
            .map_err(|e| e.at_node(&url))
    }

    async fn stream_blocks(
        &self,
        tenants: &TenantScope,
        query: &Query,
        shard: usize,
        sink: &dyn BlockSink,
    ) -> Result<()> {
        let response = self.request(Endpoint::Query, tenants, query, &[]).send().await?;
        let response = check_status(response).await?;

        let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let mut frames = FramedRead::new(StreamReader::new(body), FrameDecoder::new());

        let compressed = self.compressed();
        let mut scratch = Vec::new();
        let mut block = DataBlock::new();
        let mut blocks = 0usize;
        while let Some(frame) = frames.try_next().await? {
            let raw = codec::decode_payload(&frame, compressed, &mut scratch)?;
            let mut reader = BlockReader::new(raw);
            while reader.read_next(&mut block)? {
                sink.write_block(shard, &block).await?;
            }
            blocks += reader.blocks_read();
        }
        debug!(addr = %self.addr, shard, blocks, "finished reading query stream");
        Ok(())
    }

    /// Fetches one value-list blob from this node and decodes it.
    pub async fn get_values(
        &self,
        endpoint: Endpoint,
        tenants: &TenantScope,
        query: &Query,
        extra: &[(&'static str, String)],
    ) -> Result<Vec<ValueWithHits>> {
        let url = self.url(endpoint);
        self.fetch_values(endpoint, tenants, query, extra)
            .await
            .map_err(|e| e.at_node(&url))
    }

    async fn fetch_values(
        &self,
        endpoint: Endpoint,
        tenants: &TenantScope,
        query: &Query,
        extra: &[(&'static str, String)],
    ) -> Result<Vec<ValueWithHits>> {
        let response = self.request(endpoint, tenants, query, extra).send().await?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;

        let mut scratch = Vec::new();
        let raw = codec::decode_payload(&body, self.compressed(), &mut scratch)?;
        unmarshal_values_with_hits(raw)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("<cannot read response body: {}>", e),
    };
    Err(SelectError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}
