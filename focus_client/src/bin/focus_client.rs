//! Focus client binary.
//!
use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use focus_client::{
    analyzer::AnalyzerClient,
    broadcast_channel,
    config::{Args, ClientConfig},
    endpoints::{self, PreviewChannels},
    locale::Messages,
    meter::spawn_meter_logger,
    render::DisplayContext,
    session::FocusSession,
    status::StatusBoard,
    surface::{font_or_default, CanvasSurface},
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::from(Args::parse());

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Launching focus client with source {}", &config.source);

    let endpoint = config
        .endpoint_url()
        .with_context(|| format!("invalid endpoint {:?}", &config.endpoint))?;
    let analyzer = AnalyzerClient::new(endpoint, config.request_timeout)?;

    // Overlay surface and status sink, sized once the first frame is known
    let font = font_or_default(config.font.as_deref());
    let status = StatusBoard::new();
    let (overlay_tx, _) = broadcast_channel();
    let (video_tx, _) = broadcast_channel();
    let display = DisplayContext::new(
        CanvasSurface::new(0, 0, Some(font)),
        status.clone(),
        Messages::for_locale(config.locale),
    )
    .with_overlay_publisher(overlay_tx.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl-C");
        }
        shutdown_tx.send(true).ok();
    });

    let preview = match config.preview_address {
        Some(addr) => {
            let listener = std::net::TcpListener::bind(addr)
                .with_context(|| format!("cannot bind preview server to {addr}"))?;
            let channels = PreviewChannels {
                video_tx: video_tx.clone(),
                overlay_tx,
                status,
            };
            Some(tokio::spawn(endpoints::serve(
                listener,
                channels,
                wait_for(shutdown_rx.clone()),
            )))
        }
        None => None,
    };

    // A camera failure is terminal, it has already been displayed
    let session = match FocusSession::start(&config, display, analyzer).await {
        Ok(session) => session,
        Err(err) => {
            if let Some(preview) = preview {
                log::info!("Preview keeps showing the error until Ctrl-C");
                preview.await??;
            }
            return Err(err.into());
        }
    };

    if config.preview_address.is_some() {
        session.spawn_video_pump(video_tx);
    }

    if config.once {
        let result = session.send_frame().await;
        session.shutdown().await;
        let result = result?;
        println!("{}", session.display().status().current().text);
        log::info!("Verdict: {:?}", result.verdict());
        return Ok(());
    }

    spawn_meter_logger();
    session.run(wait_for(shutdown_rx)).await;

    if let Some(preview) = preview {
        preview.await??;
    }

    Ok(())
}

async fn wait_for(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
