use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::Key;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sfu::config::Config;
use sfu::dispatcher::Dispatcher;
use sfu::http::{build_router, AppState};
use sfu::media;
use sfu::orchestrator::Orchestrator;
use sfu::registry::Registry;
use sfu::relay_manager::RelayManager;
use sfu::room_manager::RoomManager;
use sfu::{logging, metrics};

/// How long shutdown waits for in-flight requests/connections to drain
/// after SIGINT/SIGTERM before the process exits anyway.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    logging::init(&config.mode);
    metrics::register();

    let secret = config.resolve_secret().unwrap_or_else(|err| {
        eprintln!("configuration error: {err}");
        std::process::exit(1);
    });
    let key = Key::derive_from(secret.as_bytes());

    let stun_url = config
        .stun_url
        .clone()
        .unwrap_or_else(|| "stun:stun.l.google.com:19302".to_string());
    let api = Arc::new(media::build_api());
    let rtc_config = media::build_rtc_config(&stun_url);

    let registry = Arc::new(Registry::new());
    let rooms = Arc::new(RoomManager::new());
    let relays = Arc::new(RelayManager::new());
    let orchestrator = Arc::new(Orchestrator::new(registry, rooms, relays));

    let media_factory_api = api.clone();
    let media_factory_config = rtc_config.clone();
    let media_factory: sfu::dispatcher::MediaFactory = Arc::new(move || {
        let api = media_factory_api.clone();
        let config = media_factory_config.clone();
        Box::pin(async move {
            let mc = media::WebrtcMediaConnection::new(&api, config).await?;
            Ok(Arc::new(mc) as Arc<dyn sfu::capability::MediaConnection>)
        })
    });
    let dispatcher = Arc::new(Dispatcher::new(orchestrator.clone(), media_factory));

    let state = AppState {
        orchestrator,
        dispatcher,
        config: Arc::new(config.clone()),
        key,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!(%addr, "SFU HTTP/signaling server listening");

    let shutdown = CancellationToken::new();
    let signal_cancel = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("received shutdown signal");
        signal_cancel.cancel();
    });

    let graceful_cancel = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        graceful_cancel.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(%err, "server exited with error");
            }
        }
        _ = async { shutdown.cancelled().await; tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await } => {
            warn!("shutdown grace period elapsed, forcing exit");
        }
    }

    info!("SFU shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
