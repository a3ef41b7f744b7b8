use std::sync::Arc;

use tokio::net::TcpListener;
use touchdb_server::{telemetry, Server};
use tracing::info;

const DEFAULT_PORT: &str = "5984";
const DEFAULT_DIR: &str = "touchdb-data";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::initialise("info")?;

    let port = std::env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
    let dir = std::env::var("TOUCHDB_DIR").unwrap_or_else(|_| DEFAULT_DIR.to_string());
    let server = Arc::new(Server::open(&dir)?);

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, %dir, "listening");
    touchdb_server::run(listener, server).await?;
    Ok(())
}
