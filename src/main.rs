//! Livestack: multi-camera live preview and stack recording

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use livestack::{Config, Coordinator, Notification};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("livestack=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Livestack launching...");

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;

    let coordinator = Arc::new(Coordinator::with_tiff(config.clone()));
    for spec in &config.cameras {
        if let Err(e) = coordinator.add_camera_from_spec(spec) {
            error!(camera = %spec.key, "Failed to add camera: {}", e);
        }
    }
    if coordinator.camera_keys().is_empty() {
        return Err(color_eyre::eyre::eyre!("no camera could be opened"));
    }

    // Preview refresh, polls the newest live frame of every camera
    let preview = {
        let coordinator = coordinator.clone();
        let period = Duration::from_millis(config.preview.poll_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut last_seen = std::collections::HashMap::new();
            loop {
                interval.tick().await;
                for key in coordinator.camera_keys() {
                    let Some(frame) = coordinator.latest_frame(&key) else {
                        continue;
                    };
                    if last_seen.insert(key.clone(), frame.sequence()) != Some(frame.sequence()) {
                        debug!(camera = %key, sequence = frame.sequence(), "Preview frame");
                    }
                }
            }
        })
    };

    let events = coordinator.notifications();
    coordinator.record(config.session_request())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping recording");
                coordinator.stop_recording();
            }
            event = events.recv_async() => match event {
                Ok(Notification::RecordingFinished { files }) => {
                    for file in &files {
                        info!(file = %file.display(), "Stack written");
                    }
                    break;
                }
                Ok(Notification::CameraDeleted { key }) => warn!(camera = %key, "Camera removed"),
                Ok(Notification::RoiChanged { key, roi }) => info!(camera = %key, ?roi, "ROI changed"),
                Err(_) => break,
            }
        }
    }

    preview.abort();
    for report in coordinator.finish_session() {
        info!(
            file = %report.path.display(),
            written = report.written,
            failed = report.failed,
            "Writer report"
        );
    }
    for key in coordinator.camera_keys() {
        if let Some((written, read, dropped)) = coordinator.live_stats(&key) {
            debug!(camera = %key, written, read, dropped, "Live buffer stats");
        }
    }

    tokio::task::spawn_blocking(move || coordinator.shutdown()).await?;
    info!("Livestack stopped");
    Ok(())
}
