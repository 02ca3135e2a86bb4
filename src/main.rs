use anyhow::{bail, Context};
use lectern::kernel::segment::SegmentStatus;
use lectern::outputs::clock::ClockOutput;
use lectern::services::http::{HttpSynthesisGateway, HttpUploader};
use lectern::{LecternConfig, ReaderSession};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<LecternConfig> {
    match std::env::var("LECTERN_CONFIG") {
        Ok(path) => LecternConfig::from_json_file(&path).with_context(|| format!("loading {path}")),
        Err(_) => LecternConfig::from_env().context("reading LECTERN_* environment"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: lectern <text-file> [article-id]");
    };
    let article_id = match args.next() {
        Some(id) => id,
        None => Path::new(&path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("article")
            .to_string(),
    };

    let config = load_config()?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {path}"))?;

    let gateway = Arc::new(HttpSynthesisGateway::new(config.gateway_url.clone(), config.generation_timeout()));
    let uploader = Arc::new(HttpUploader::new(config.storage_url.clone()));
    let reader = Arc::new(ReaderSession::new(&config, gateway, uploader, Box::new(ClockOutput::new()))?);

    let outcome = reader.set_source_text(&article_id, &text);
    if outcome.segments == 0 {
        bail!("{path} contains no readable text");
    }
    tracing::info!(article = %article_id, segments = outcome.segments, provider = config.provider.name(), "Lectern booting...");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down");
                shutdown.cancel();
            }
        });
    }

    // 1. Generate everything
    reader.enqueue_all();
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    while !reader.scheduler().is_idle() {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = poll.tick() => {}
        }
    }

    let snapshot = reader.snapshot();
    for segment in snapshot.segments.iter().filter(|s| s.status == SegmentStatus::Error) {
        tracing::warn!(segment = %segment.id, error = segment.error.as_deref().unwrap_or_default(), "segment not generated");
    }

    // 2. Play in sequence on the clock output, following word highlights
    if let Some(first) = snapshot.segments.iter().find(|s| s.is_ready()).map(|s| s.id) {
        let clock_stop = shutdown.child_token();
        let clock = {
            let (reader, cancel, tick) = (Arc::clone(&reader), clock_stop.clone(), config.playback_tick());
            tokio::spawn(async move { reader.run_clock(tick, cancel).await })
        };

        let mut updates = reader.subscribe_playback();
        reader.start_sequence_from(first)?;
        let mut last = (None, None);
        loop {
            let session = updates.borrow_and_update().clone();
            if session.active_segment_id.is_none() {
                break;
            }
            let current = (session.active_segment_id, session.active_word_index);
            if current != last {
                if let (Some(segment), Some(word)) = current {
                    tracing::info!(segment = %segment, word, t = session.current_time, "highlight");
                }
                last = current;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = updates.changed() => if changed.is_err() { break },
            }
        }
        reader.stop();
        clock_stop.cancel();
        let _ = clock.await;
    }
    if shutdown.is_cancelled() {
        return Ok(());
    }

    // 3. Persist
    let summary = reader.upload_all(&article_id).await?;
    println!("{}", serde_json::to_string(&summary)?);

    let stats = reader.telemetry();
    tracing::info!(
        generated = stats.generation.succeeded,
        failed = stats.generation.failed,
        avg_latency_ms = stats.generation.avg_latency_ms,
        uploads = stats.upload.succeeded,
        retries = stats.upload.retries,
        "Lectern done."
    );
    Ok(())
}
