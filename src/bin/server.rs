//! Gateway entry point: bootstraps every subsystem and serves the REST/WS
//! API and the Egress Proxy side by side until one of them exits.

use std::path::PathBuf;

use carapace::gateway;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_env("CARAPACE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = data_dir();
    let (state, proxy) = gateway::bootstrap(data_dir).await?;

    let host = state.config.server.host.clone();
    let port = state.config.server.port;
    let addr = format!("{host}:{port}");

    let router = gateway::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway listening");

    let server = axum::serve(listener, router);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gateway server exited");
            }
        }
        result = proxy.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "egress proxy exited");
            }
        }
    }

    Ok(())
}

fn data_dir() -> PathBuf {
    std::env::var("CARAPACE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"))
}
