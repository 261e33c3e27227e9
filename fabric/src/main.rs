use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use clap::Parser;
use fabric_bindings::ftp::FtpUploadClient;
use fabric_core::{
    affinity::AffinityCache,
    config::read_to_end,
    context::CONTENT_TYPE_HEADER,
    orchestrator::{RuntimeWrapper, WorkerPool},
};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::config::Config;

mod config;
mod factory;

// Largest file accepted for upload: 1 GB
const MAX_UPLOAD_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file
    #[clap(short, long, value_parser)]
    config: PathBuf,
    /// Name of the FTP target to upload to
    #[clap(short, long)]
    target: String,
    /// Files to upload
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
    let args = Args::parse();

    // Load config on a throwaway runtime; workers own theirs.
    let config = RuntimeWrapper::legacy()?.block_on(Config::load(&args.config))?;
    let client = factory::ftp_upload_client(&args.target, config.target(&args.target)?.clone())?;

    let pool = WorkerPool::start(config.runtime.clone())?;
    info!("{} workers started", pool.workers());

    let mut handles = Vec::with_capacity(args.files.len());
    for path in args.files {
        let client = client.clone();
        let job_path = path.clone();
        match pool.spawn(move |cache| upload_file(cache, client, job_path)) {
            Ok(handle) => handles.push((path, handle)),
            Err(e) => error!(path = %path.display(), "upload not scheduled: {e}"),
        }
    }

    let total = handles.len();
    let mut failed = 0;
    for (path, handle) in handles {
        match futures::executor::block_on(handle) {
            Ok(Ok(size)) => info!(path = %path.display(), size, "uploaded"),
            Ok(Err(e)) => {
                failed += 1;
                error!(path = %path.display(), "upload failed: {e:#}");
            }
            Err(e) => {
                failed += 1;
                error!(path = %path.display(), "upload did not run: {e}");
            }
        }
    }
    pool.shutdown();

    if failed > 0 {
        bail!("{failed} of {total} uploads failed");
    }
    Ok(())
}

/// Runs on a worker: one file is one request, started from a clean work context.
async fn upload_file(
    cache: AffinityCache,
    client: FtpUploadClient,
    path: PathBuf,
) -> Result<usize> {
    let scope = cache.begin_request();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let data = Bytes::from(read_to_end(&path, MAX_UPLOAD_SIZE).await?);
    let size = data.len();

    let ctx = scope.cache().with_work_context(|ctx| {
        ctx.set_header(CONTENT_TYPE_HEADER, factory::content_type(&path).to_string());
        ctx.clone()
    });
    client.upload(&ctx, file_name, data).await?;
    Ok(size)
}

