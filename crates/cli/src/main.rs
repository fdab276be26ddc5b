//! Operator CLI for Splice multipart uploads.
//!
//! Every command builds a fresh engine from the configured backend, runs one
//! operation and prints its result as JSON on stdout.

mod config;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use splice_core::{
    CompletedPart, CopySource, CreateMultipartUpload, ObjectAttributes, UploadId, UploadTarget,
};
use splice_mpu::MultipartBackend;
use splice_storage::ObjectStore;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "splicectl")]
#[command(about = "Multipart uploads on compose-only object stores")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SPLICE_CONFIG")]
    config: Option<PathBuf>,

    /// Print engine metrics to stderr after the command
    #[arg(long, global = true, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ObjectArgs {
    /// Destination bucket
    #[arg(long)]
    bucket: String,

    /// Destination key
    #[arg(long)]
    key: String,
}

#[derive(Args, Clone)]
struct TargetArgs {
    #[command(flatten)]
    object: ObjectArgs,

    /// Upload ID returned by `create`
    #[arg(long)]
    upload_id: String,
}

impl TargetArgs {
    fn target(&self) -> Result<UploadTarget> {
        let upload_id = UploadId::parse(&self.upload_id).context("invalid --upload-id")?;
        Ok(UploadTarget::new(
            &self.object.bucket,
            &self.object.key,
            upload_id,
        ))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a multipart upload
    Create {
        #[command(flatten)]
        object: ObjectArgs,

        #[arg(long)]
        content_type: Option<String>,

        #[arg(long)]
        cache_control: Option<String>,

        #[arg(long)]
        content_disposition: Option<String>,

        #[arg(long)]
        content_encoding: Option<String>,

        /// User metadata entry (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Store a part
    UploadPart {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        part_number: u32,

        /// File holding the part body (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Store a part by copying an existing object
    UploadPartCopy {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        part_number: u32,

        /// Source object as `bucket/key`
        #[arg(long)]
        source: String,
    },
    /// List stored parts
    ListParts {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        max_parts: Option<usize>,
    },
    /// Assemble the parts into the destination object
    Complete {
        #[command(flatten)]
        target: TargetArgs,

        /// Part numbers in order (comma separated or repeated)
        #[arg(long = "part", value_delimiter = ',', required = true)]
        parts: Vec<u32>,
    },
    /// Discard an upload and its temporary objects
    Abort {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Object tagging (not supported by this backend)
    Tagging {
        #[command(subcommand)]
        command: TaggingCommands,
    },
}

#[derive(Subcommand)]
enum TaggingCommands {
    Get {
        #[command(flatten)]
        object: ObjectArgs,
    },
    Put {
        #[command(flatten)]
        object: ObjectArgs,

        #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        tags: Vec<(String, String)>,
    },
    Delete {
        #[command(flatten)]
        object: ObjectArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::load(cli.config.as_deref())?;
    splice_mpu::metrics::register_metrics();

    let store = splice_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::debug!(backend = store.backend_name(), "storage backend ready");

    let backend = MultipartBackend::new(store, config.buckets.clone(), &config.mpu);
    let result = run(&backend, cli.command).await;

    if cli.metrics {
        let text = splice_mpu::metrics::render().context("failed to render metrics")?;
        eprint!("{text}");
    }
    result
}

async fn run(backend: &MultipartBackend, command: Commands) -> Result<()> {
    match command {
        Commands::Create {
            object,
            content_type,
            cache_control,
            content_disposition,
            content_encoding,
            metadata,
        } => {
            let attributes = ObjectAttributes {
                content_type,
                cache_control,
                content_disposition,
                content_encoding,
                metadata: metadata.into_iter().collect(),
            };
            let session = backend
                .create_multipart_upload(CreateMultipartUpload {
                    bucket: object.bucket,
                    key: object.key,
                    attributes,
                })
                .await
                .context("failed to create upload")?;
            print_json(&session)
        }
        Commands::UploadPart {
            target,
            part_number,
            file,
        } => {
            let body = read_body(file).await?;
            let part = backend
                .upload_part(&target.target()?, part_number, body)
                .await
                .with_context(|| format!("failed to upload part {part_number}"))?;
            print_json(&part)
        }
        Commands::UploadPartCopy {
            target,
            part_number,
            source,
        } => {
            let source = CopySource::parse(&source)
                .ok_or_else(|| anyhow::anyhow!("--source must be bucket/key, got {source:?}"))?;
            let part = backend
                .upload_part_copy(&target.target()?, part_number, &source)
                .await
                .with_context(|| format!("failed to copy part {part_number} from {source}"))?;
            print_json(&part)
        }
        Commands::ListParts { target, max_parts } => {
            let listed = backend
                .list_parts(&target.target()?, max_parts)
                .await
                .context("failed to list parts")?;
            print_json(&listed)
        }
        Commands::Complete { target, parts } => {
            let parts: Vec<CompletedPart> = parts.into_iter().map(CompletedPart::new).collect();
            let completed = backend
                .complete_multipart_upload(&target.target()?, &parts)
                .await
                .context("failed to complete upload")?;
            print_json(&completed)
        }
        Commands::Abort { target } => {
            let stats = backend
                .abort_multipart_upload(&target.target()?)
                .await
                .context("failed to abort upload")?;
            print_json(&stats)
        }
        Commands::Tagging { command } => handle_tagging_command(backend, command).await,
    }
}

async fn handle_tagging_command(backend: &MultipartBackend, command: TaggingCommands) -> Result<()> {
    match command {
        TaggingCommands::Get { object } => {
            let tags = backend
                .get_object_tagging(&object.bucket, &object.key)
                .await?;
            print_json(&tags)
        }
        TaggingCommands::Put { object, tags } => {
            let tags: BTreeMap<String, String> = tags.into_iter().collect();
            backend
                .put_object_tagging(&object.bucket, &object.key, tags)
                .await?;
            Ok(())
        }
        TaggingCommands::Delete { object } => {
            backend
                .delete_object_tagging(&object.bucket, &object.key)
                .await?;
            Ok(())
        }
    }
}

async fn read_body(file: Option<PathBuf>) -> Result<Bytes> {
    match file {
        Some(path) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Bytes::from(data))
        }
        None => {
            let mut data = Vec::new();
            std::io::stdin()
                .read_to_end(&mut data)
                .context("failed to read part body from stdin")?;
            Ok(Bytes::from(data))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
