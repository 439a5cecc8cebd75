//! The binary seqgate-srv.
//!
//! Reads one json request per line, from a file or stdin, serves them
//! concurrently and writes the replies as json lines to stdout. Logs go to
//! stderr.

use seqgate_api::config::Config;
use seqgate_api::*;
use seqgate_core::context::GatewayModConfig;
use seqgate_core::exclude_cache::ExcludeCacheModConfig;
use seqgate_core::factories::mem_backend::config::*;
use seqgate_core::factories::mem_local_cache::config::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;

mod sink;
use sink::StdoutReplySink;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Json config document. Modules it leaves out keep their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend fixture to serve. Overrides `memBackend.fixturePath`.
    #[arg(long)]
    pub fixture: Option<PathBuf>,

    /// Local cache snapshot. Overrides `localCache.snapshotPath`.
    #[arg(long)]
    pub cache_snapshot: Option<PathBuf>,

    /// Print the effective config and exit.
    #[arg(long)]
    pub print_config: bool,

    /// Requests, one json object per line. Defaults to stdin.
    pub requests: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = <Args as clap::Parser>::parse();
    tracing::debug!(?args);

    if let Err(err) = run(args).await {
        tracing::error!(?err, "seqgate-srv failed");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn read(path: &Path) -> GwResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        GwError::other_src(format!("cannot read {}", path.display()), e)
    })
}

/// Defaults, overlaid with the config file, overlaid with the flags.
fn load_config(args: &Args, builder: &seqgate_core::Builder) -> GwResult<()> {
    let config = &builder.config;
    if let Some(path) = &args.config {
        let file = Config::from_json_str(&read(path)?)?;
        config.set_module_config(&file.get_module_config::<GatewayModConfig>()?)?;
        config.set_module_config(
            &file.get_module_config::<ExcludeCacheModConfig>()?,
        )?;
        config
            .set_module_config(&file.get_module_config::<MemBackendModConfig>()?)?;
        config.set_module_config(
            &file.get_module_config::<MemLocalCacheModConfig>()?,
        )?;
    }
    if let Some(path) = &args.fixture {
        config.set_module_config(&MemBackendModConfig {
            mem_backend: MemBackendConfig {
                fixture_path: Some(path.to_string_lossy().to_string()),
            },
        })?;
    }
    if let Some(path) = &args.cache_snapshot {
        config.set_module_config(&MemLocalCacheModConfig {
            local_cache: MemLocalCacheConfig {
                snapshot_path: Some(path.to_string_lossy().to_string()),
            },
        })?;
    }
    Ok(())
}

async fn run(args: Args) -> GwResult<()> {
    let builder = seqgate_core::default_builder().with_default_config()?;
    load_config(&args, &builder)?;

    if args.print_config {
        let text = serde_json::to_string_pretty(&builder.config)
            .map_err(|e| GwError::other_src("encode config", e))?;
        println!("{text}");
        return Ok(());
    }

    let gateway = builder.build().await?;

    let input: Box<dyn tokio::io::AsyncRead + Unpin + Send> =
        match &args.requests {
            Some(path) => Box::new(tokio::fs::File::open(path).await.map_err(
                |e| {
                    GwError::other_src(
                        format!("cannot open {}", path.display()),
                        e,
                    )
                },
            )?),
            None => Box::new(tokio::io::stdin()),
        };
    let mut lines = tokio::io::BufReader::new(input).lines();

    let mut tasks = tokio::task::JoinSet::new();
    let mut request_no = 0_u64;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| GwError::other_src("read requests", e))?
    {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        request_no += 1;

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(request_no, ?err, "bad request line");
                let message = ReplyChunk::Message {
                    severity: Severity::Error,
                    status: 400,
                    text: format!("invalid request: {err}"),
                };
                let completion = ReplyChunk::Completion { status: 400 };
                for chunk in [message, completion] {
                    StdoutReplySink::write_line(&serde_json::json!({
                        "request": request_no,
                        "chunk": chunk,
                    }))?;
                }
                continue;
            }
        };

        let gateway = gateway.clone();
        tasks.spawn(async move {
            let sink = Box::new(StdoutReplySink::new(request_no));
            let outcome = gateway.handle(request, sink).await;
            tracing::debug!(request_no, status = outcome.status, "served");
        });
    }

    while let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            tracing::error!(?err, "request task failed");
        }
    }

    let counters = gateway.context().counters().snapshot();
    tracing::info!(?counters, "done");
    Ok(())
}
