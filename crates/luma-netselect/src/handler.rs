//! Server side of the internal select protocol.
//!
//! [`routes`] mounts one warp filter for every endpoint under
//! `/internal/select/`. The query endpoint streams frames while the engine
//! runs; the value-list endpoints answer with one blob.

use crate::block::DataBlock;
use crate::codec;
use crate::engine::QueryEngine;
use crate::error::{Result, SelectError};
use crate::metrics;
use crate::protocol::{
    self, Endpoint, PARAM_DISABLE_COMPRESSION, PARAM_FIELD, PARAM_LIMIT, PARAM_QUERY,
    PARAM_TENANT_IDS, PARAM_TIMESTAMP, PARAM_VERSION,
};
use crate::query::Query;
use crate::sink::BlockSink;
use crate::tenant::TenantScope;
use crate::values::marshal_values_with_hits;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use warp::http::{header, StatusCode};
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection};

/// Buffered bytes per engine worker before a frame is written.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1 << 20;

// Frames queued between the engine and the HTTP body.
const RESPONSE_CHANNEL_CAPACITY: usize = 16;

type Params = HashMap<String, String>;

pub struct RequestHandler {
    engine: Arc<dyn QueryEngine>,
    flush_threshold: usize,
}

impl RequestHandler {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            engine,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes.max(1);
        self
    }

    /// Serves one request. Metrics are recorded whether or not it succeeds.
    pub async fn handle(self: Arc<Self>, endpoint: Endpoint, params: Params) -> Response {
        let started = Instant::now();
        metrics::REQUESTS_TOTAL
            .with_label_values(&[endpoint.path()])
            .inc();

        if endpoint.is_streaming() {
            return self.handle_query(params, started).await;
        }

        let result = catch_panic(self.values_blob(endpoint, &params)).await;
        record_outcome(endpoint, started, result.as_ref().err());
        match result {
            Ok(blob) => octet_stream(Body::from(blob)),
            Err(err) => error_response(&err),
        }
    }

    async fn handle_query(self: Arc<Self>, params: Params, started: Instant) -> Response {
        let request = match CommonParams::parse(Endpoint::Query, &params) {
            Ok(request) => request,
            Err(err) => {
                record_outcome(Endpoint::Query, started, Some(&err));
                return error_response(&err);
            }
        };

        let (tx, mut rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let (done_tx, mut done_rx) = oneshot::channel();
        let writer = FrameWriter::new(tx, !request.disable_compression, self.flush_threshold);
        tokio::spawn(async move {
            let run = async {
                self.engine
                    .run_query(&request.tenants, &request.query, &writer)
                    .await?;
                writer.flush_all().await
            };
            let result = catch_panic(run).await;
            if let Err(err) = &result {
                if !err.is_trivial() && writer.started() {
                    writer.abort(err).await;
                }
            }
            record_outcome(Endpoint::Query, started, result.as_ref().err());
            let _ = done_tx.send(result);
        });

        // The status line is held back until the first frame is ready, so a
        // query that fails before producing anything still gets a 500.
        let first = tokio::select! {
            biased;
            chunk = rx.recv() => First::Chunk(chunk),
            done = &mut done_rx => First::Done(done.ok()),
        };
        match first {
            First::Chunk(Some(chunk)) => {
                let body = futures::stream::iter([chunk]).chain(ReceiverStream::new(rx));
                octet_stream(Body::wrap_stream(body))
            }
            First::Chunk(None) => match done_rx.await {
                Ok(Err(err)) if !err.is_trivial() => error_response(&err),
                _ => octet_stream(Body::empty()),
            },
            First::Done(Some(Err(err))) if !err.is_trivial() => error_response(&err),
            First::Done(_) => octet_stream(Body::wrap_stream(ReceiverStream::new(rx))),
        }
    }

    async fn values_blob(&self, endpoint: Endpoint, params: &Params) -> Result<Vec<u8>> {
        let request = CommonParams::parse(endpoint, params)?;
        let (tenants, query) = (&request.tenants, &request.query);
        let engine = &self.engine;
        let values = match endpoint {
            Endpoint::FieldNames => engine.field_names(tenants, query).await?,
            Endpoint::FieldValues => {
                let field = required(params, PARAM_FIELD)?;
                engine
                    .field_values(tenants, query, field, parse_limit(params)?)
                    .await?
            }
            Endpoint::StreamFieldNames => engine.stream_field_names(tenants, query).await?,
            Endpoint::StreamFieldValues => {
                let field = required(params, PARAM_FIELD)?;
                engine
                    .stream_field_values(tenants, query, field, parse_limit(params)?)
                    .await?
            }
            Endpoint::Streams => engine.streams(tenants, query, parse_limit(params)?).await?,
            Endpoint::StreamIds => engine.stream_ids(tenants, query, parse_limit(params)?).await?,
            Endpoint::Query => {
                return Err(SelectError::Engine(
                    "query endpoint does not produce a value list".into(),
                ))
            }
        };

        let raw = marshal_values_with_hits(&values);
        debug!(
            path = endpoint.path(),
            values = values.len(),
            bytes = raw.len(),
            "sending value list"
        );
        Ok(codec::encode_payload(&raw, !request.disable_compression)?.into_owned())
    }
}

/// Mounts every internal select endpoint.
pub fn routes(
    handler: Arc<RequestHandler>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::get()
        .and(warp::path!("internal" / "select" / String))
        .and(warp::query::<Params>())
        .and_then(move |name: String, params: Params| {
            let handler = handler.clone();
            async move {
                let endpoint = Endpoint::from_name(&name).ok_or_else(warp::reject::not_found)?;
                Ok::<_, Rejection>(handler.handle(endpoint, params).await)
            }
        })
}

struct CommonParams {
    tenants: TenantScope,
    query: Query,
    disable_compression: bool,
}

impl CommonParams {
    /// Checks the protocol version first so that a mismatched peer is turned
    /// away before anything else is decoded or executed.
    fn parse(endpoint: Endpoint, params: &Params) -> Result<Self> {
        let version = params.get(PARAM_VERSION).map(String::as_str).unwrap_or("");
        if version != endpoint.protocol_version() {
            return Err(SelectError::ProtocolMismatch {
                path: endpoint.path(),
                got: version.to_string(),
                want: endpoint.protocol_version(),
            });
        }

        let tenants = TenantScope::decode(required(params, PARAM_TENANT_IDS)?)?;
        let timestamp = required(params, PARAM_TIMESTAMP)?
            .parse::<i64>()
            .map_err(|e| SelectError::bad_param(PARAM_TIMESTAMP, e.to_string()))?;
        let query = Query::parse(required(params, PARAM_QUERY)?, timestamp)?;
        let disable_compression = match params.get(PARAM_DISABLE_COMPRESSION) {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| {
                SelectError::bad_param(PARAM_DISABLE_COMPRESSION, format!("{v:?}"))
            })?,
        };

        Ok(Self {
            tenants,
            query,
            disable_compression,
        })
    }
}

/// Turns a panic inside the engine into an ordinary error so the request
/// still fails visibly and is accounted for.
async fn catch_panic<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(SelectError::Engine("query engine panicked".into())),
    }
}

fn required<'a>(params: &'a Params, name: &'static str) -> Result<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SelectError::bad_param(name, "missing"))
}

fn parse_limit(params: &Params) -> Result<u64> {
    match params.get(PARAM_LIMIT) {
        None => Ok(0),
        Some(v) if v.is_empty() => Ok(0),
        Some(v) => v
            .parse::<u64>()
            .map_err(|e| SelectError::bad_param(PARAM_LIMIT, e.to_string())),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn record_outcome(endpoint: Endpoint, started: Instant, err: Option<&SelectError>) {
    let path = endpoint.path();
    metrics::REQUEST_DURATION_SECONDS
        .with_label_values(&[path])
        .observe(started.elapsed().as_secs_f64());
    match err {
        Some(err) if err.is_trivial() => {
            debug!(path, error = %err, "client went away");
        }
        Some(err) => {
            metrics::REQUEST_ERRORS_TOTAL.with_label_values(&[path]).inc();
            error!(path, error = %err, "cannot serve internal select request");
        }
        None => {}
    }
}

fn octet_stream(body: Body) -> Response {
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(protocol::CONTENT_TYPE),
    );
    response
}

fn error_response(err: &SelectError) -> Response {
    let status = match err {
        SelectError::ProtocolMismatch { .. } | SelectError::BadParam { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut response = Response::new(Body::from(err.to_string()));
    *response.status_mut() = status;
    response
}

type Chunk = std::result::Result<Bytes, std::io::Error>;

enum First {
    Chunk(Option<Chunk>),
    Done(Option<Result<()>>),
}

/// Turns engine blocks into frames on the response body.
///
/// Each engine worker appends to its own buffer; once a buffer reaches the
/// flush threshold it is compressed and written as one frame. Writes to the
/// body are serialized by `out` so a frame header and its payload are never
/// split by another worker's frame.
struct FrameWriter {
    buffers: DashMap<usize, Vec<u8>>,
    out: Mutex<mpsc::Sender<Chunk>>,
    started: AtomicBool,
    compressed: bool,
    flush_threshold: usize,
}

impl FrameWriter {
    fn new(tx: mpsc::Sender<Chunk>, compressed: bool, flush_threshold: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            out: Mutex::new(tx),
            started: AtomicBool::new(false),
            compressed,
            flush_threshold,
        }
    }

    async fn write_frame(&self, raw: &[u8]) -> Result<()> {
        let payload = codec::encode_payload(raw, self.compressed)?;
        let header = codec::frame_header(payload.len());
        let payload = Bytes::copy_from_slice(&payload);

        let out = self.out.lock().await;
        self.started.store(true, Ordering::Relaxed);
        out.send(Ok(Bytes::copy_from_slice(&header)))
            .await
            .map_err(|_| SelectError::ClientDisconnected)?;
        out.send(Ok(payload))
            .await
            .map_err(|_| SelectError::ClientDisconnected)
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Writes whatever is still buffered, in worker order.
    async fn flush_all(&self) -> Result<()> {
        let mut pending: Vec<(usize, Vec<u8>)> = self
            .buffers
            .iter_mut()
            .map(|mut entry| (*entry.key(), std::mem::take(entry.value_mut())))
            .filter(|(_, buf)| !buf.is_empty())
            .collect();
        pending.sort_by_key(|(worker, _)| *worker);
        for (_, buf) in pending {
            self.write_frame(&buf).await?;
        }
        Ok(())
    }

    /// Fails the response body so the client sees a broken stream instead of
    /// a clean end of stream.
    async fn abort(&self, err: &SelectError) {
        let out = self.out.lock().await;
        let _ = out.send(Err(std::io::Error::other(err.to_string()))).await;
    }
}

#[async_trait]
impl BlockSink for FrameWriter {
    async fn write_block(&self, worker: usize, block: &DataBlock) -> Result<()> {
        let ready = {
            let mut buf = self.buffers.entry(worker).or_default();
            block.marshal(&mut *buf);
            if buf.len() < self.flush_threshold {
                return Ok(());
            }
            std::mem::take(&mut *buf)
        };
        self.write_frame(&ready).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockReader;
    use crate::codec::FrameDecoder;
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid(version: &str) -> Params {
        params(&[
            ("version", version),
            ("tenant_ids", "[{\"account_id\":0,\"project_id\":0}]"),
            ("query", "*"),
            ("timestamp", "100"),
            ("disable_compression", "false"),
        ])
    }

    #[test]
    fn test_common_params() {
        let p = CommonParams::parse(Endpoint::Query, &valid("v1")).unwrap();
        assert_eq!(p.query.timestamp(), 100);
        assert!(!p.disable_compression);
        assert_eq!(p.tenants.tenants().len(), 1);
    }

    #[test]
    fn test_version_mismatch_is_checked_first() {
        let mut p = valid("v2");
        p.remove("tenant_ids");
        assert!(matches!(
            CommonParams::parse(Endpoint::FieldNames, &p),
            Err(SelectError::ProtocolMismatch { got, .. }) if got == "v2"
        ));
    }

    #[test]
    fn test_bad_params() {
        let mut p = valid("v1");
        p.insert("timestamp".into(), "soon".into());
        assert!(matches!(
            CommonParams::parse(Endpoint::Query, &p),
            Err(SelectError::BadParam { name: "timestamp", .. })
        ));

        let mut p = valid("v1");
        p.insert("disable_compression".into(), "maybe".into());
        assert!(CommonParams::parse(Endpoint::Query, &p).is_err());

        assert_eq!(parse_limit(&params(&[])).unwrap(), 0);
        assert_eq!(parse_limit(&params(&[("limit", "25")])).unwrap(), 25);
        assert!(parse_limit(&params(&[("limit", "-1")])).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        let mismatch = SelectError::ProtocolMismatch {
            path: "/internal/select/query",
            got: "v2".into(),
            want: "v1",
        };
        assert_eq!(error_response(&mismatch).status(), StatusCode::BAD_REQUEST);
        let engine = SelectError::Engine("boom".into());
        assert_eq!(
            error_response(&engine).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    async fn drain(mut rx: mpsc::Receiver<Chunk>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn block(rows: usize, tag: &str) -> DataBlock {
        let mut b = DataBlock::new();
        b.add_column("_msg", (0..rows).map(|i| format!("{tag}{i}")).collect())
            .unwrap();
        b
    }

    #[tokio::test]
    async fn test_frame_writer_batches_per_worker() {
        for compressed in [false, true] {
            let (tx, rx) = mpsc::channel(64);
            let writer = FrameWriter::new(tx, compressed, 40);
            writer.write_block(0, &block(2, "a")).await.unwrap();
            writer.write_block(1, &block(1, "b")).await.unwrap();
            writer.write_block(0, &block(10, "c")).await.unwrap();
            writer.flush_all().await.unwrap();
            drop(writer);

            let stream = drain(rx).await;
            let mut buf = BytesMut::from(&stream[..]);
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            while let Some(frame) = decoder.decode_eof(&mut buf).unwrap() {
                frames.push(frame);
            }
            // worker 0 crossed the threshold once, worker 1 was flushed at the end
            assert_eq!(frames.len(), 2);

            let mut scratch = Vec::new();
            let mut decoded = DataBlock::new();
            let mut counts = Vec::new();
            for frame in &frames {
                let raw = codec::decode_payload(frame, compressed, &mut scratch).unwrap();
                let mut reader = BlockReader::new(raw);
                while reader.read_next(&mut decoded).unwrap() {
                    counts.push(decoded.rows_count());
                }
            }
            assert_eq!(counts, vec![2, 10, 1]);
        }
    }

    async fn exploding_engine() -> Result<u32> {
        panic!("engine bug")
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_error() {
        let err = catch_panic(exploding_engine()).await.unwrap_err();
        assert!(matches!(err, SelectError::Engine(msg) if msg.contains("panicked")));
        assert_eq!(catch_panic(async { Ok::<u32, SelectError>(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_closed_body_is_client_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let writer = FrameWriter::new(tx, false, 1);
        let err = writer.write_block(0, &block(1, "x")).await.unwrap_err();
        assert!(err.is_trivial());
    }
}
