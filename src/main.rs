use std::sync::Arc;
use anyhow::{Context, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use moda_upload::config::Config;
use moda_upload::core::{MetadataStore, RemoteFileStore};
use moda_upload::utils::{format_bytes, format_duration, format_speed, format_timestamp};
use moda_upload::{
    Destination,
    FileRef,
    GraphFileStore,
    MemoryFileStore,
    MemoryMetadataStore,
    QueueEvent,
    RestMetadataStore,
    UploadOptions,
    UploadQueue,
};

const USAGE: &str =
    "usage: moda-upload <config.toml> <project-id> <project-name> <category> <discipline> <file>...";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,moda_upload=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 6 {
        bail!(USAGE);
    }

    let config = Config::load(&args[0]).with_context(|| format!("loading {}", args[0]))?;

    let files: Arc<dyn RemoteFileStore> = match &config.sharepoint {
        Some(sharepoint) => Arc::new(GraphFileStore::new(sharepoint)?),
        None => {
            tracing::warn!("no [sharepoint] section, files stay in memory");
            Arc::new(MemoryFileStore::new())
        }
    };
    let metadata: Arc<dyn MetadataStore> = match &config.supabase {
        Some(supabase) => Arc::new(RestMetadataStore::new(supabase)?),
        None => {
            tracing::warn!("no [supabase] section, metadata stays in memory");
            Arc::new(MemoryMetadataStore::new())
        }
    };

    let mut inputs = Vec::new();
    for path in &args[5..] {
        inputs.push(FileRef::load(path).await.with_context(|| format!("reading {path}"))?);
    }

    let options = UploadOptions {
        destination: Destination {
            project_id: args[1].clone(),
            project_name: args[2].clone(),
            category_name: args[3].clone(),
            discipline_name: args[4].clone(),
            module_folder_name: None,
            module: None,
            versioned_file_name: None,
        },
        created_by: std::env::var("USER").unwrap_or_else(|_| "moda-upload".to_string()),
        notes: None,
    };

    let handle = UploadQueue::new(files, metadata, config.queue.clone());
    let mut events = handle.queue.subscribe_events();
    let ids = handle.queue.enqueue(inputs, options);
    let mut remaining = ids.len();
    let started = std::time::Instant::now();

    while remaining > 0 {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "events skipped");
                let state = handle.queue.get_state();
                remaining = ids.len().saturating_sub(state.completed_count + state.failed_count);
                continue;
            }
            Err(err) => bail!("queue closed: {err}"),
        };

        match event {
            QueueEvent::Progress { task_id, progress } => {
                tracing::info!(
                    task_id = %task_id,
                    percent = progress.percent,
                    uploaded = %format_bytes(progress.bytes_uploaded),
                    speed = %format_speed(progress.speed_bytes_per_sec),
                    "progress"
                );
            }
            QueueEvent::Completed { task_id, file, version } => {
                let finished = handle.queue.get_task(task_id).and_then(|task| task.end_time);
                match finished {
                    Some(at) => println!("[{}] uploaded v{version}: {}", format_timestamp(at), file.web_url),
                    None => println!("uploaded v{version}: {}", file.web_url),
                }
                remaining = remaining.saturating_sub(1);
            }
            QueueEvent::Failed { failure, .. } => {
                eprintln!("failed ({:?}): {}", failure.kind, failure.message);
                remaining = remaining.saturating_sub(1);
            }
            _ => {}
        }
    }

    let state = handle.queue.get_state();
    tracing::info!(
        completed = state.completed_count,
        failed = state.failed_count,
        elapsed = %format_duration(started.elapsed()),
        "all uploads finished"
    );
    handle.shutdown().await?;

    if state.failed_count > 0 {
        bail!("{} upload(s) failed", state.failed_count);
    }
    Ok(())
}
