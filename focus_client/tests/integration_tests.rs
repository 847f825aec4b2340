use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use common::{
    data_uri,
    protocol::{AnalysisRequest, AnalysisResult},
};
use focus_client::{
    analyzer::AnalyzerClient,
    capture::encode_jpeg,
    config::{ClientConfig, InFlightPolicy},
    endpoints::{self, PreviewChannels},
    locale::Messages,
    render::{DisplayContext, LABEL_BAND_HEIGHT},
    sensors::SourceSpec,
    session::{FocusSession, Tick},
    status::{Status, StatusBoard},
    surface::{CanvasSurface, Color, Surface},
    Error,
};
use image::{Rgb, RgbImage, RgbaImage};
use reqwest::Url;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, Debug, PartialEq)]
enum Op {
    Resize(u32, u32),
    ClearRect(u32, u32, u32, u32),
    DrawImage {
        source: (u32, u32),
        target: (u32, u32, u32, u32),
    },
    FillText(String, Color),
}

/// Surface that records operations instead of drawing.
struct RecordingSurface {
    size: (u32, u32),
    ops: Vec<Op>,
}

impl RecordingSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ops: vec![],
        }
    }
}

impl Surface for RecordingSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.ops.push(Op::Resize(width, height));
    }

    fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.ops.push(Op::ClearRect(x, y, width, height));
    }

    fn draw_image(&mut self, image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) {
        self.ops.push(Op::DrawImage {
            source: image.dimensions(),
            target: (x, y, width, height),
        });
    }

    fn fill_text(&mut self, text: &str, _x: i32, _y: i32, color: Color) {
        self.ops.push(Op::FillText(text.to_owned(), color));
    }
}

/// Analyzer stub answering every frame with a fixed result.
#[derive(Clone)]
struct StubAnalyzer {
    result: AnalysisResult,
    /// Answer with the uploaded frame as annotated image.
    echo: bool,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<AnalysisRequest>>>,
}

impl StubAnalyzer {
    fn new(result: AnalysisResult) -> Self {
        Self {
            result,
            echo: false,
            delay: Duration::ZERO,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    fn num_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn process_frame(
    Extension(stub): Extension<StubAnalyzer>,
    Json(request): Json<AnalysisRequest>,
) -> Json<AnalysisResult> {
    let active = stub.active.fetch_add(1, Ordering::SeqCst) + 1;
    stub.max_active.fetch_max(active, Ordering::SeqCst);

    tokio::time::sleep(stub.delay).await;

    let mut result = stub.result.clone();
    if stub.echo {
        result.image = Some(request.image.clone());
    }
    stub.requests.lock().unwrap().push(request);
    stub.active.fetch_sub(1, Ordering::SeqCst);

    Json(result)
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

async fn spawn_stub(stub: StubAnalyzer) -> SocketAddr {
    let app = Router::new()
        .route("/process_frame", post(process_frame))
        .layer(Extension(stub));
    spawn_server(app).await
}

fn analyzer_for(addr: SocketAddr) -> AnalyzerClient {
    let endpoint = Url::parse(&format!("http://{addr}/process_frame")).unwrap();
    AnalyzerClient::new(endpoint, Duration::from_secs(5)).unwrap()
}

fn test_config(width: u32, height: u32) -> ClientConfig {
    ClientConfig {
        source: SourceSpec::Pattern {
            size: Some((width, height)),
        },
        interval: Duration::from_millis(20),
        preview_address: None,
        ..Default::default()
    }
}

fn recording_display() -> DisplayContext<RecordingSurface> {
    DisplayContext::new(RecordingSurface::new(0, 0), StatusBoard::new(), Messages::EN)
}

fn ops(session: &FocusSession<RecordingSurface>) -> Vec<Op> {
    session.display().with_surface(|surface| surface.ops.clone())
}

fn red_jpeg_data_uri(width: u32, height: u32) -> String {
    let frame = RgbImage::from_pixel(width, height, Rgb([255, 0, 0]));
    data_uri::encode("image/jpeg", &encode_jpeg(&frame, 95).unwrap())
}

#[tokio::test]
async fn test_overlay_matches_native_video_size() -> TestResult {
    let addr = spawn_stub(StubAnalyzer::new(AnalysisResult::focused())).await;

    // The device ignores the requested 1280x720
    let config = test_config(640, 480);
    let session = FocusSession::start(&config, recording_display(), analyzer_for(addr)).await?;

    assert_eq!(session.stream().native_size(), (640, 480));
    assert_eq!(session.display().dimensions(), (640, 480));
    assert_eq!(ops(&session), vec![Op::Resize(640, 480)]);

    Ok(())
}

#[tokio::test]
async fn test_focused_verdict() -> TestResult {
    let stub = StubAnalyzer::new(AnalysisResult::focused());
    let addr = spawn_stub(stub.clone()).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    let result = session.send_frame().await?;

    assert!(result.focused);
    assert_eq!(
        session.display().status().current(),
        Status::new("focused", Color::Green)
    );
    assert_eq!(stub.num_requests(), 1);
    let request = stub.requests.lock().unwrap()[0].clone();
    assert!(request.image.starts_with("data:image/jpeg;base64,"));

    Ok(())
}

#[tokio::test]
async fn test_not_focused_verdict() -> TestResult {
    let addr = spawn_stub(StubAnalyzer::new(AnalysisResult::not_focused("R"))).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    session.send_frame().await?;

    assert_eq!(
        session.display().status().current(),
        Status::new("not focused: R", Color::Red)
    );
    assert_eq!(
        ops(&session)[1..],
        [
            Op::ClearRect(0, 0, 64, LABEL_BAND_HEIGHT),
            Op::FillText("not focused: R".into(), Color::Red)
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_annotated_image_clears_before_drawing() -> TestResult {
    let result = AnalysisResult::focused().with_image(red_jpeg_data_uri(32, 24));
    let addr = spawn_stub(StubAnalyzer::new(result)).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    session.send_frame().await?;

    let ops = ops(&session);
    let draw_at = ops
        .iter()
        .position(|op| matches!(op, Op::DrawImage { .. }))
        .expect("image drawn");
    assert_eq!(ops[draw_at - 1], Op::ClearRect(0, 0, 64, 48));
    assert_eq!(
        ops[draw_at],
        Op::DrawImage {
            source: (32, 24),
            target: (0, 0, 64, 48)
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_annotated_image_covers_canvas() -> TestResult {
    let result = AnalysisResult::not_focused("eyes closed").with_image(red_jpeg_data_uri(16, 12));
    let addr = spawn_stub(StubAnalyzer::new(result)).await;
    let display = DisplayContext::new(
        CanvasSurface::new(0, 0, None),
        StatusBoard::new(),
        Messages::EN,
    );
    let session = FocusSession::start(&test_config(64, 48), display, analyzer_for(addr)).await?;

    session.send_frame().await?;

    session.display().with_surface(|surface| {
        let pixel = surface.pixels().get_pixel(32, 47);
        assert!(pixel.0[0] > 200 && pixel.0[1] < 60 && pixel.0[3] == 255);
    });

    Ok(())
}

#[tokio::test]
async fn test_transport_failure_shows_server_error() -> TestResult {
    // Nothing listens on a port that was just released
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    let err = session.send_frame().await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(
        session.display().status().current(),
        Status::new("a server error occurred", Color::Red)
    );
    assert_eq!(
        ops(&session)[1..],
        [
            Op::ClearRect(0, 0, 64, 48),
            Op::FillText("a server error occurred".into(), Color::Red)
        ]
    );

    // Later cycles are attempted again
    assert!(session.send_frame().await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_transport_failure_clears_previous_result() -> TestResult {
    let jpeg = encode_jpeg(&RgbImage::from_pixel(16, 12, Rgb([0, 0, 255])), 95)?;
    let annotated = data_uri::encode("image/jpeg", &jpeg);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/process_frame",
        post(move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Json(AnalysisResult::focused().with_image(annotated)).into_response(),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
            }
        }),
    );
    let addr = spawn_server(app).await;
    let display = DisplayContext::new(
        CanvasSurface::new(0, 0, None),
        StatusBoard::new(),
        Messages::EN,
    );
    let session = FocusSession::start(&test_config(64, 48), display, analyzer_for(addr)).await?;

    session.send_frame().await?;
    session.display().with_surface(|surface| {
        assert!(surface.pixels().get_pixel(32, 47).0[2] > 200);
    });

    assert!(session.send_frame().await.is_err());

    assert_eq!(
        session.display().status().current(),
        Status::new("a server error occurred", Color::Red)
    );
    session.display().with_surface(|surface| {
        // Only the red message is left, the blue annotated frame is gone
        assert!(surface.pixels().pixels().all(|pixel| pixel.0[2] == 0));
        assert!(surface.pixels().pixels().any(|pixel| pixel.0[0] > 0));
    });

    Ok(())
}

#[tokio::test]
async fn test_zero_interval_does_not_panic() -> TestResult {
    let stub = StubAnalyzer::new(AnalysisResult::focused());
    let addr = spawn_stub(stub.clone()).await;
    let config = ClientConfig {
        interval: Duration::ZERO,
        ..test_config(64, 48)
    };
    let session = FocusSession::start(&config, recording_display(), analyzer_for(addr)).await?;
    let handle = session.clone();

    session
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await;

    assert!(handle.stream().is_released());

    Ok(())
}

#[tokio::test]
async fn test_malformed_response_is_transport_error() -> TestResult {
    let app = Router::new().route("/process_frame", post(|| async { "not json" }));
    let addr = spawn_server(app).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    let err = session.send_frame().await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(
        session.display().status().current().text,
        "a server error occurred"
    );

    Ok(())
}

#[tokio::test]
async fn test_bad_request_verdict_is_rendered() -> TestResult {
    let app = Router::new().route(
        "/process_frame",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(AnalysisResult::not_focused("Invalid request")),
            )
        }),
    );
    let addr = spawn_server(app).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    session.send_frame().await?;

    assert_eq!(
        session.display().status().current(),
        Status::new("not focused: Invalid request", Color::Red)
    );

    Ok(())
}

#[tokio::test]
async fn test_acquisition_failure_shows_camera_error() -> TestResult {
    let config = ClientConfig {
        source: SourceSpec::File("/nonexistent/camera.jpg".into()),
        ..test_config(64, 48)
    };
    let addr = spawn_stub(StubAnalyzer::new(AnalysisResult::focused())).await;
    let display = DisplayContext::new(
        RecordingSurface::new(640, 480),
        StatusBoard::new(),
        Messages::EN,
    );

    let result = FocusSession::start(&config, display.clone(), analyzer_for(addr)).await;

    assert!(matches!(result, Err(ref err) if err.is_acquisition()));
    assert_eq!(
        display.status().current(),
        Status::new("failed to start the camera", Color::Red)
    );
    assert_eq!(
        display.with_surface(|surface| surface.ops.clone()),
        vec![
            Op::ClearRect(0, 0, 640, 480),
            Op::FillText("failed to start the camera".into(), Color::Red)
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_captured_frame_round_trips_through_render() -> TestResult {
    let mut stub = StubAnalyzer::new(AnalysisResult::focused());
    stub.echo = true;
    let addr = spawn_stub(stub).await;
    let session =
        FocusSession::start(&test_config(80, 60), recording_display(), analyzer_for(addr)).await?;

    session.send_frame().await?;

    assert!(ops(&session).contains(&Op::DrawImage {
        source: (80, 60),
        target: (0, 0, 80, 60)
    }));

    Ok(())
}

#[tokio::test]
async fn test_annotated_image_by_url() -> TestResult {
    let jpeg = encode_jpeg(&RgbImage::from_pixel(8, 6, Rgb([0, 0, 255])), 90)?;
    let stub = StubAnalyzer::new(AnalysisResult::focused().with_image("/annotated/latest.jpg"));
    let app = Router::new()
        .route("/process_frame", post(process_frame))
        .route(
            "/annotated/latest.jpg",
            get(move || async move { ([("content-type", "image/jpeg")], jpeg).into_response() }),
        )
        .layer(Extension(stub));
    let addr = spawn_server(app).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    session.send_frame().await?;

    assert!(ops(&session).contains(&Op::DrawImage {
        source: (8, 6),
        target: (0, 0, 64, 48)
    }));

    Ok(())
}

#[tokio::test]
async fn test_drop_policy_skips_while_in_flight() -> TestResult {
    let mut stub = StubAnalyzer::new(AnalysisResult::focused());
    stub.delay = Duration::from_millis(300);
    let addr = spawn_stub(stub.clone()).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;

    let first = session.tick();
    let second = session.tick();
    let third = session.tick();

    assert!(matches!(second, Tick::Skipped));
    assert!(matches!(third, Tick::Skipped));
    match first {
        Tick::Sent(handle) => handle.await?,
        other => panic!("expected a sent tick, got {other:?}"),
    }

    assert_eq!(stub.num_requests(), 1);
    assert_eq!(stub.max_active.load(Ordering::SeqCst), 1);

    // The slot is free again
    assert!(matches!(session.tick(), Tick::Sent(_)));

    Ok(())
}

#[tokio::test]
async fn test_queue_policy_defers_one_tick() -> TestResult {
    let mut stub = StubAnalyzer::new(AnalysisResult::focused());
    stub.delay = Duration::from_millis(200);
    let addr = spawn_stub(stub.clone()).await;
    let config = ClientConfig {
        in_flight: InFlightPolicy::Queue,
        ..test_config(64, 48)
    };
    let session = FocusSession::start(&config, recording_display(), analyzer_for(addr)).await?;

    let first = session.tick();
    let second = session.tick();
    let third = session.tick();

    assert!(matches!(third, Tick::Skipped));
    for tick in [first, second] {
        match tick {
            Tick::Sent(handle) | Tick::Queued(handle) => handle.await?,
            Tick::Skipped => panic!("tick should not be skipped"),
        }
    }

    assert_eq!(stub.num_requests(), 2);
    assert_eq!(stub.max_active.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_run_stops_and_releases_camera() -> TestResult {
    let stub = StubAnalyzer::new(AnalysisResult::focused());
    let addr = spawn_stub(stub.clone()).await;
    let session =
        FocusSession::start(&test_config(64, 48), recording_display(), analyzer_for(addr)).await?;
    let handle = session.clone();

    session
        .run(tokio::time::sleep(Duration::from_millis(200)))
        .await;

    assert!(handle.stream().is_released());
    assert!(stub.num_requests() >= 1);

    Ok(())
}

#[tokio::test]
async fn test_preview_endpoints() -> TestResult {
    let status = StatusBoard::new();
    status.set(Status::new("focused", Color::Green));
    let (video_tx, _) = focus_client::broadcast_channel();
    let (overlay_tx, _) = focus_client::broadcast_channel();
    let channels = PreviewChannels {
        video_tx,
        overlay_tx,
        status,
    };

    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    tokio::spawn(endpoints::serve(listener, channels, std::future::pending()));

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{addr}/healthcheck"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(health, "healthy");

    let result: serde_json::Value = client
        .get(format!("http://{addr}/result"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(
        result,
        serde_json::json!({"text": "focused", "color": "green"})
    );

    let resp = client.get(format!("http://{addr}/overlay")).send().await?;
    assert_eq!(
        resp.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );

    Ok(())
}
