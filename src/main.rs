use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use devsync::config::{Config, TlsPaths};
use devsync::persistence::{JsonFileStore, MemoryStore, RoomStore};
use devsync::registry::RoomRegistry;
use devsync::routes::routes;
use devsync::server::Server;
use log::{error, info, warn};

/// Checks that the configured certificate chain and key parse as PEM before
/// handing the paths to warp, which would otherwise panic at bind time.
fn load_tls_config(tls: &TlsPaths) -> Result<(), String> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| format!("failed to open {}: {}", path.display(), e))
    };

    let certs = rustls_pemfile::certs(&mut open(tls.cert.as_path())?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("failed to parse certificate: {}", e))?;
    if certs.is_empty() {
        return Err(format!("no certificates in {}", tls.cert.display()));
    }

    match rustls_pemfile::private_key(&mut open(tls.key.as_path())?) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(format!("no private key in {}", tls.key.display())),
        Err(e) => Err(format!("failed to parse private key: {}", e)),
    }
}

async fn open_store(config: &Config) -> Arc<dyn RoomStore> {
    match &config.data_dir {
        Some(dir) => match JsonFileStore::open(dir).await {
            Ok(store) => {
                info!("Saving rooms under {}", dir.display());
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    "Cannot use {} for saved rooms ({}); keeping saves in memory",
                    dir.display(),
                    e
                );
                Arc::new(MemoryStore::default())
            }
        },
        None => Arc::new(MemoryStore::default()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, closing server");
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = open_store(&config).await;
    let server = Arc::new(Server::new(
        Arc::new(RoomRegistry::new()),
        &config.limits,
        store,
    ));
    let routes = routes(server);
    let addr = config.socket_addr();

    let tls = config.tls.as_ref().and_then(|tls| match load_tls_config(tls) {
        Ok(()) => Some(tls),
        Err(e) => {
            warn!("Failed to load TLS config ({}), falling back to HTTP/WS", e);
            None
        }
    });

    match tls {
        Some(tls) => {
            let (addr, serving) = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .bind_with_graceful_shutdown(addr, shutdown_signal());
            info!("Devsync server running on https://{} (WSS at /ws)", addr);
            serving.await;
        }
        None => match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
            Ok((addr, serving)) => {
                info!("Devsync server running on http://{} (WS at /ws)", addr);
                serving.await;
            }
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                std::process::exit(1);
            }
        },
    }
    info!("Server closed");
}
