// THEORY:
// The visualizer is the debug-sink collaborator of `rally_vision`. It never feeds
// anything back into segmentation. The pieces:
//   - `FrameBus`: two tokio broadcast channels, one for rendered overlay frames and
//     one for per-frame metadata. Slow subscribers lag and skip; they never block
//     the producer.
//   - `overlay`: renders the per-frame panel and the whole-run timeline.
//   - `sink::BusSink`: a `DebugSink` that publishes onto the bus.
//   - `start_server` (`web` feature): a small axum server streaming the bus over
//     WebSockets, with play/pause control for replays.

pub mod overlay;
pub mod sink;

use std::sync::Arc;

use rally_vision::FrameDebug;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone)]
pub struct FramePacket {
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Arc<[u8]>,
}

/// What the browser needs to annotate one frame.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "web", derive(serde::Serialize, serde::Deserialize))]
pub struct Meta {
    pub index: u64,
    pub timestamp: f64,
    pub label: String,
    pub minimal_movement: bool,
    pub stability_score: f64,
    pub movement_score: f64,
    pub rally_open: bool,
    pub low_movement_run: u32,
    pub segments_closed: u64,
}

impl Meta {
    pub fn from_frame(frame: &FrameDebug, segments_closed: u64) -> Self {
        Self {
            index: frame.index,
            timestamp: frame.timestamp,
            label: frame.label.as_str().to_string(),
            minimal_movement: frame.minimal_movement,
            stability_score: frame.stability_score,
            movement_score: frame.movement_score,
            rally_open: frame.rally_open,
            low_movement_run: frame.low_movement_run,
            segments_closed,
        }
    }
}

#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
    pub meta_tx: broadcast::Sender<Meta>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        let (meta_tx, _) = broadcast::channel::<Meta>(capacity.max(1));
        Self { frames_tx, meta_tx }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ControlHandle {
    pub play_tx: tokio::sync::watch::Sender<bool>,
}

impl ControlHandle {
    /// A handle starting in the given play state, and a receiver to watch it.
    pub fn new(playing: bool) -> (Self, tokio::sync::watch::Receiver<bool>) {
        let (play_tx, play_rx) = tokio::sync::watch::channel(playing);
        (Self { play_tx }, play_rx)
    }
}

#[cfg(feature = "web")]
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Rally Vision</title></head>
<body style="font-family:monospace;background:#111;color:#ddd">
  <h2>Rally Vision</h2>
  <div style="margin:8px 0;display:flex;gap:12px;align-items:center">
    <button id="play">Play</button>
    <button id="pause">Pause</button>
    <span id="status">idle</span>
  </div>
  <img id="panel" width="640" height="128" style="border:1px solid #444;image-rendering:pixelated">
  <pre id="meta"></pre>
  <script>
    const proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
    const status = (t) => document.getElementById('status').textContent = t;
    document.getElementById('play').onclick = () => fetch('/control/play', {method: 'POST'}).then(() => status('playing'));
    document.getElementById('pause').onclick = () => fetch('/control/pause', {method: 'POST'}).then(() => status('paused'));
    const frames = new WebSocket(proto + location.host + '/ws/frames');
    frames.binaryType = 'blob';
    let url = null;
    frames.onmessage = (ev) => {
      if (url) URL.revokeObjectURL(url);
      url = URL.createObjectURL(new Blob([ev.data], {type: 'image/jpeg'}));
      document.getElementById('panel').src = url;
    };
    const meta = new WebSocket(proto + location.host + '/ws/meta');
    meta.onmessage = (ev) => document.getElementById('meta').textContent = JSON.stringify(JSON.parse(ev.data), null, 2);
  </script>
</body>
</html>"#;

#[cfg(feature = "web")]
pub async fn start_server(
    bus: FrameBus,
    cfg: ServerConfig,
    control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use anyhow::Context;
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::http::StatusCode;
    use axum::response::Html;
    use axum::routing::{get, post};
    use axum::Router;
    use tokio::sync::broadcast::error::RecvError;

    async fn forward_meta(mut socket: WebSocket, mut rx: broadcast::Receiver<Meta>) {
        loop {
            match rx.recv().await {
                Ok(meta) => {
                    let Ok(text) = serde_json::to_string(&meta) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("meta subscriber skipped {skipped} message(s)")
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn forward_frames(mut socket: WebSocket, mut rx: broadcast::Receiver<FramePacket>) {
        loop {
            match rx.recv().await {
                Ok(packet) => {
                    if socket.send(Message::Binary(packet.data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("frame subscriber skipped {skipped} frame(s)")
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let meta_tx = bus.meta_tx.clone();
    let frames_tx = bus.frames_tx.clone();
    let app = Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/ws/meta",
            get(move |ws: WebSocketUpgrade| {
                let rx = meta_tx.subscribe();
                async move { ws.on_upgrade(move |socket| forward_meta(socket, rx)) }
            }),
        )
        .route(
            "/ws/frames",
            get(move |ws: WebSocketUpgrade| {
                let rx = frames_tx.subscribe();
                async move { ws.on_upgrade(move |socket| forward_frames(socket, rx)) }
            }),
        )
        .route(
            "/control/play",
            post({
                let tx = control.play_tx.clone();
                move || {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(true);
                        StatusCode::NO_CONTENT
                    }
                }
            }),
        )
        .route(
            "/control/pause",
            post({
                let tx = control.play_tx.clone();
                move || {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(false);
                        StatusCode::NO_CONTENT
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind visualizer to {}", cfg.bind_addr))?;
    log::info!("visualizer listening on http://{}", cfg.bind_addr);

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            log::error!("visualizer server stopped: {err}");
        }
    });
    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _bus: FrameBus,
    _cfg: ServerConfig,
    _control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for rally_vision_visualizer"))
}
