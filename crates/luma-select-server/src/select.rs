use luma_netselect::{
    sink_fn, stop_channel, Coordinator, DataBlock, Query, SelectError, TenantScope, ValueWithHits,
};
use serde_json::{Map, Value};
use std::io::Write;
use tokio::signal;
use tracing::{debug, info, warn};

/// What to ask the cluster for.
#[derive(Debug, Clone)]
pub enum Request {
    Rows,
    FieldNames,
    FieldValues { field: String, limit: u64 },
    StreamFieldNames,
    StreamFieldValues { field: String, limit: u64 },
    Streams { limit: u64 },
    StreamIds { limit: u64 },
}

/// Runs `request` against every configured node and prints the result to
/// stdout as JSON lines.
pub async fn run(
    coordinator: &Coordinator,
    tenants: &TenantScope,
    query: &Query,
    request: Request,
) -> Result<(), anyhow::Error> {
    debug!(nodes = ?coordinator.nodes().collect::<Vec<_>>(), %query, "running select");
    let values = match request {
        Request::Rows => return stream_rows(coordinator, tenants, query).await,
        Request::FieldNames => coordinator.field_names(tenants, query).await?,
        Request::FieldValues { field, limit } => {
            coordinator.field_values(tenants, query, &field, limit).await?
        }
        Request::StreamFieldNames => coordinator.stream_field_names(tenants, query).await?,
        Request::StreamFieldValues { field, limit } => {
            coordinator
                .stream_field_values(tenants, query, &field, limit)
                .await?
        }
        Request::Streams { limit } => coordinator.streams(tenants, query, limit).await?,
        Request::StreamIds { limit } => coordinator.stream_ids(tenants, query, limit).await?,
    };
    print_values(&values)
}

async fn stream_rows(
    coordinator: &Coordinator,
    tenants: &TenantScope,
    query: &Query,
) -> Result<(), anyhow::Error> {
    let (handle, stop) = stop_channel();
    let watcher = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, stopping select");
                handle.stop();
            }
            // The handle lives as long as this task; dropping it would stop the query.
            Err(e) => {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    });

    let sink = sink_fn(|shard, block| {
        let mut out = std::io::stdout().lock();
        for line in block_lines(shard, block) {
            writeln!(out, "{line}")?;
        }
        Ok::<(), SelectError>(())
    });
    let result = coordinator.run_query(&stop, tenants, query, &sink).await;
    watcher.abort();
    Ok(result?)
}

fn block_lines(shard: usize, block: &DataBlock) -> impl Iterator<Item = String> + '_ {
    (0..block.rows_count()).map(move |i| {
        let mut row = Map::new();
        for (name, value) in block.row(i) {
            row.insert(name.to_string(), Value::String(value.to_string()));
        }
        row.insert("_shard".to_string(), Value::from(shard));
        Value::Object(row).to_string()
    })
}

fn print_values(values: &[ValueWithHits]) -> Result<(), anyhow::Error> {
    let mut out = std::io::stdout().lock();
    for v in values {
        writeln!(out, "{}", serde_json::to_string(v)?)?;
    }
    Ok(())
}
