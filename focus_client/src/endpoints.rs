//! Endpoints of the local preview server.
//!
use std::{convert::Infallible, future::Future, net::TcpListener};

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use bytes::Bytes;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::{status::StatusBoard, BroadcastSender};

/// Broadcast channels feeding the preview streams.
#[derive(Clone)]
pub struct PreviewChannels {
    pub video_tx: BroadcastSender,
    pub overlay_tx: BroadcastSender,
    pub status: StatusBoard,
}

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<body>
    <div style="position: relative; display: inline-block">
        <img src="./video" style="display: block">
        <img src="./overlay" style="position: absolute; top: 0; left: 0; width: 100%; height: 100%; opacity: 0.9">
    </div>
    <p id="result"></p>
    <script>
        const result = document.getElementById("result");
        setInterval(async () => {
            const status = await (await fetch("./result")).json();
            result.textContent = status.text;
            result.style.color = status.color || "";
        }, 500);
    </script>
</body>
</html>
"#;

/// Build the preview router.
pub fn router(channels: PreviewChannels) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/video", get(video_stream))
        .route("/overlay", get(overlay_stream))
        .route("/result", get(result))
        .layer(Extension(channels))
}

/// Serve the preview endpoints on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    channels: PreviewChannels,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    log::info!("Preview available on http://{}", listener.local_addr()?);
    axum::Server::from_tcp(listener)?
        .serve(router(channels).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Live camera frames.
pub async fn video_stream(Extension(channels): Extension<PreviewChannels>) -> impl IntoResponse {
    log::info!("Video stream requested");
    multipart_stream(&channels.video_tx)
}

/// Overlay snapshots after every draw.
pub async fn overlay_stream(
    Extension(channels): Extension<PreviewChannels>,
) -> impl IntoResponse {
    log::info!("Overlay stream requested");
    multipart_stream(&channels.overlay_tx)
}

/// Latest status text and color.
pub async fn result(Extension(channels): Extension<PreviewChannels>) -> impl IntoResponse {
    Json(channels.status.current())
}

fn multipart_stream(tx: &BroadcastSender) -> impl IntoResponse {
    // Lagging receivers skip frames instead of ending the response
    let stream = BroadcastStream::new(tx.subscribe())
        .filter_map(|item| item.ok().map(Ok::<Bytes, Infallible>));

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}
