use std::net::SocketAddr;

use duocall_server::{build_app, default_rate_limiter_prune_period, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let cfg = match ServerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("duocall-server: {err}");
            std::process::exit(err.exit_code());
        }
    };

    let (router, engine, rate_limiter) = build_app(&cfg);
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    let listener = match tokio::net::TcpListener::bind(&cfg.listen_addr).await {
        Ok(listener) => listener,
        Err(source) => {
            let err = duocall_server::ServerError::Bind {
                addr: cfg.listen_addr.clone(),
                source,
            };
            eprintln!("duocall-server: {err}");
            std::process::exit(err.exit_code());
        }
    };

    log::info!(
        "duocall-server listening on {} ({})",
        cfg.listen_addr,
        cfg.environment
    );

    let reaper = engine.clone().spawn_idle_reaper();
    let pruner = tokio::spawn(duocall_engine::spawn_pruner(
        rate_limiter,
        default_rate_limiter_prune_period(),
    ));

    if let Err(err) = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("server loop exited with error: {err}");
    }

    reaper.abort();
    pruner.abort();
    engine.shutdown_all().await;
    log::info!("duocall-server shut down cleanly");
}

/// Waits for `SIGINT` (`Ctrl+C`) or `SIGTERM`, whichever comes first
/// (SPEC_FULL.md ADDITIONS §G's graceful shutdown). On either, `main` stops
/// accepting new connections, cancels both reapers, and tears down every
/// session still tracked by the pool before exiting 0.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
