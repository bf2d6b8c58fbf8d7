// Raspberry Pi camera web server

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use picam_server::{
    battery::HwmonPowerMonitor,
    camera::{CameraSession, GstCamera},
    frame_buffer::FrameBuffer,
    settings::SettingsStore,
    web::{self, AppState},
    AppConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "picam_server=info,tower_http=info".into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let config = Arc::new(AppConfig::from_env());
    tracing::info!(
        settings = %config.settings_path.display(),
        options = %config.options_path.display(),
        www = %config.www_dir.display(),
        captures = %config.capture_dir.display(),
        device = %config.camera_device,
        "Configuration loaded"
    );

    let settings = Arc::new(
        SettingsStore::load(&config.settings_path, &config.options_path)
            .context("cannot start without settings")?,
    );

    let device = GstCamera::new(config.camera_device.clone())?;
    let camera = Arc::new(CameraSession::new(
        Box::new(device),
        FrameBuffer::new(),
        settings.clone(),
        config.capture_dir.clone(),
    ));
    {
        let camera = camera.clone();
        tokio::task::spawn_blocking(move || camera.ensure_streaming())
            .await?
            .context("cannot start camera")?;
    }

    let state = AppState {
        config: config.clone(),
        settings,
        camera: camera.clone(),
        power: Arc::new(HwmonPowerMonitor::new(config.battery_hwmon.clone())),
    };
    let app = web::create_router(state);

    let addr = config.bind_addr();
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_tcp_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("cannot bind {addr} (port 80 needs root)"))?;
    socket.listen(128)?;

    let std_listener: StdTcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener)?;

    tracing::info!("Camera server listening on http://{}", addr);
    tracing::info!("Stream: http://{}/stream.mjpg", addr);

    tokio::select! {
        res = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => res?,
        _ = signal::ctrl_c() => tracing::info!("Shutting down..."),
    }

    tokio::task::spawn_blocking(move || camera.shutdown()).await?;
    Ok(())
}
