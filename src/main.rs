use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use forecourt::calendar::WorkingCalendar;
use forecourt::observability;
use forecourt::tenant::TenantManager;
use forecourt::wire;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("FORECOURT_METRICS_PORT");
    observability::init(metrics_port);

    let port = env_or("FORECOURT_PORT", "5434");
    let bind = env_or("FORECOURT_BIND", "0.0.0.0");
    let data_dir = env_or("FORECOURT_DATA_DIR", "./data");
    let password = env_or("FORECOURT_PASSWORD", "forecourt");
    let max_connections: usize = env_parse("FORECOURT_MAX_CONNECTIONS").unwrap_or(256);
    let compact_threshold: u64 = env_parse("FORECOURT_COMPACT_THRESHOLD").unwrap_or(1000);
    let calendar = WorkingCalendar::from_env();

    let tls_cert = std::env::var("FORECOURT_TLS_CERT").ok();
    let tls_key = std::env::var("FORECOURT_TLS_KEY").ok();
    let tls_acceptor = forecourt::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(
        PathBuf::from(&data_dir),
        compact_threshold,
        calendar.clone(),
    ));
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("forecourt listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!(
        "  working window: {}-{}, {}min grid",
        calendar.day_start.format("%H:%M"),
        calendar.day_end.format("%H:%M"),
        calendar.slot_minutes
    );
    info!(
        "  tls: {}",
        if tls_acceptor.is_some() { "on" } else { "off" }
    );
    match metrics_port {
        Some(p) => info!("  metrics: http://0.0.0.0:{p}/metrics"),
        None => info!("  metrics: disabled"),
    }

    // Accept until a shutdown signal arrives, then stop taking new
    // connections and drain the in-flight ones.
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    warn!("refusing {peer}: connection limit reached");
                    metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until the connection closes
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - semaphore.available_permits();
            warn!("drain timeout, {open} connections still open");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if semaphore.available_permits() == max_connections {
        info!("all connections drained");
    }

    info!("forecourt stopped");
    Ok(())
}
