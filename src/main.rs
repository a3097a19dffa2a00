use actix_multipart::form::MultipartFormConfig;
use actix_web::{
    App, HttpServer,
    dev::ServerHandle,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use rfhub_ui::{
    api::Api,
    capture::CaptureController,
    config::AppConfig,
    hub_client::RfHubClient,
    monitor::{ConnectionMonitor, ConnectionState},
    stations::{SharedRegistry, StationRegistry},
};
use std::{
    io::Write,
    sync::{Arc, Mutex},
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

// Hub flash images are around a megabyte; anything bigger is not firmware.
const UPLOAD_LIMIT_BYTES: usize = 4 * 1024 * 1024;
const MEMORY_LIMIT_BYTES: usize = 1024 * 1024;

type HubApi = Api<RfHubClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::load().context("failed to load application configuration")?;
    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    let hub = RfHubClient::new(&config.hub).context("failed to create hub client")?;
    let registry = Arc::new(Mutex::new(StationRegistry::new(config.hub.station_capacity)));
    let capture = Arc::new(CaptureController::new());

    let monitor = ConnectionMonitor::new(config.hub.poll_fast, config.hub.poll_slow);
    let connection = monitor.subscribe();
    let poll_task = tokio::spawn(monitor.run(hub.clone(), registry.clone()));

    let (server_handle, server_task) =
        run_server(&config, hub, registry, connection, capture)?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        }
    }

    server_handle.stop(true).await;
    poll_task.abort();
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();
}

fn run_server(
    config: &AppConfig,
    hub: RfHubClient,
    registry: SharedRegistry,
    connection: watch::Receiver<ConnectionState>,
    capture: Arc<CaptureController>,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let api = HubApi::new(hub, registry, connection, capture);
    let port = config.http.port;

    info!("starting server on port {port}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(
                MultipartFormConfig::default()
                    .total_limit(UPLOAD_LIMIT_BYTES)
                    .memory_limit(MEMORY_LIMIT_BYTES),
            )
            .app_data(Data::new(api.clone()))
            .route("/api/stations", web::get().to(HubApi::stations))
            .route("/api/stations/{sid}/power", web::post().to(HubApi::set_power))
            .route("/api/stations/{sid}/record", web::post().to(HubApi::set_record))
            .route("/api/stations/{sid}/name", web::post().to(HubApi::rename))
            .route("/api/capture", web::post().to(HubApi::capture))
            .route("/api/capture/last", web::get().to(HubApi::last_capture))
            .route("/api/transmit", web::post().to(HubApi::transmit))
            .route("/update", web::post().to(HubApi::upload_firmware))
            .route("/healthcheck", web::get().to(HubApi::healthcheck))
            .route("/version", web::get().to(HubApi::version))
    })
    .bind(("0.0.0.0", port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}
