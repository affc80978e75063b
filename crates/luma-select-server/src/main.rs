mod config;
mod select;
mod server;

use clap::{Parser, Subcommand};
use config::{Config, LogFormat};
use luma_netselect::{Coordinator, Query, TenantId, TenantScope};
use select::Request;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Debug, Clone)]
struct QueryArgs {
    /// Query text, e.g. `level:error timeout`
    #[arg(short, long, default_value = "*")]
    query: String,

    /// Tenant as `account` or `account:project`; repeatable
    #[arg(short, long = "tenant")]
    tenants: Vec<TenantId>,

    /// Query timestamp in nanoseconds; defaults to now
    #[arg(long)]
    timestamp: Option<i64>,

    /// Parallel workers per storage node
    #[arg(long)]
    concurrency: Option<usize>,
}

impl QueryArgs {
    fn scope(&self) -> TenantScope {
        if self.tenants.is_empty() {
            TenantScope::single(TenantId::default())
        } else {
            TenantScope::new(self.tenants.iter().copied())
        }
    }

    fn query(&self) -> luma_netselect::Result<Query> {
        let query = match self.timestamp {
            Some(ts) => Query::parse(&self.query, ts)?,
            None => Query::now(&self.query)?,
        };
        Ok(match self.concurrency {
            Some(n) => query.with_concurrency(n),
            None => query,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve internal select requests as a storage node (default)
    Serve,
    /// Stream matching rows from every node
    Select(QueryArgs),
    FieldNames(QueryArgs),
    FieldValues {
        #[command(flatten)]
        args: QueryArgs,
        #[arg(short, long)]
        field: String,
        #[arg(short, long, default_value_t = 0)]
        limit: u64,
    },
    StreamFieldNames(QueryArgs),
    StreamFieldValues {
        #[command(flatten)]
        args: QueryArgs,
        #[arg(short, long)]
        field: String,
        #[arg(short, long, default_value_t = 0)]
        limit: u64,
    },
    Streams {
        #[command(flatten)]
        args: QueryArgs,
        #[arg(short, long, default_value_t = 0)]
        limit: u64,
    },
    StreamIds {
        #[command(flatten)]
        args: QueryArgs,
        #[arg(short, long, default_value_t = 0)]
        limit: u64,
    },
}

impl Command {
    fn into_request(self) -> Option<(QueryArgs, Request)> {
        Some(match self {
            Command::Serve => return None,
            Command::Select(args) => (args, Request::Rows),
            Command::FieldNames(args) => (args, Request::FieldNames),
            Command::FieldValues { args, field, limit } => {
                (args, Request::FieldValues { field, limit })
            }
            Command::StreamFieldNames(args) => (args, Request::StreamFieldNames),
            Command::StreamFieldValues { args, field, limit } => {
                (args, Request::StreamFieldValues { field, limit })
            }
            Command::Streams { args, limit } => (args, Request::Streams { limit }),
            Command::StreamIds { args, limit } => (args, Request::StreamIds { limit }),
        })
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.general.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let config = Config::load_or_default(&args.config)?;
    init_tracing(&config);
    tracing::debug!(config = ?args.config, "configuration loaded");

    match args.command.and_then(Command::into_request) {
        None => server::run(config).await,
        Some((query_args, request)) => {
            let coordinator = Coordinator::new(&config.cluster)?;
            let scope = query_args.scope();
            let query = query_args.query()?;
            let result = select::run(&coordinator, &scope, &query, request).await;
            coordinator.stop();
            result
        }
    }
}
