// Replays a `frames.jsonl` diagnostic dump through the visualizer server.
//
//   RV_BIND=127.0.0.1:3001 RV_MATCH_TYPE=men_doubles standalone frames.jsonl

use std::io::BufRead;
use std::time::Duration;

use anyhow::Context;
use rally_vision::core_modules::profile::resolve;
use rally_vision::{DebugSink, FrameDebug};
use rally_vision_visualizer::overlay::OverlayScale;
use rally_vision_visualizer::sink::BusSink;
use rally_vision_visualizer::{start_server, ControlHandle, FrameBus, ServerConfig};

const REPLAY_FPS: f64 = 15.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .context("usage: standalone <frames.jsonl>")?;
    let bind = std::env::var("RV_BIND").unwrap_or_else(|_| ServerConfig::default().bind_addr);
    let match_type = std::env::var("RV_MATCH_TYPE").unwrap_or_else(|_| "men_singles".to_string());
    let profile = resolve(&match_type)?;

    let file = std::fs::File::open(&path).with_context(|| format!("failed to open {path}"))?;
    let mut frames = Vec::new();
    for (line_number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: FrameDebug = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: not a frame record", line_number + 1))?;
        frames.push(frame);
    }
    log::info!("replaying {} frame(s) from {path}", frames.len());

    let bus = FrameBus::new(4);
    let (control, mut play_rx) = ControlHandle::new(false);
    let handle = start_server(bus.clone(), ServerConfig { bind_addr: bind }, control).await?;

    let mut sink = BusSink::new(bus, OverlayScale::from(&profile));
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / REPLAY_FPS));
    for frame in &frames {
        while !*play_rx.borrow() {
            play_rx.changed().await?;
        }
        ticker.tick().await;
        sink.on_frame(frame);
    }
    log::info!("replay finished");

    handle.await.ok();
    Ok(())
}
