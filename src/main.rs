//! Order Event Hub - Entry Point
//!
//! Starts the TCP listener and Dispatcher actor, accepting connections
//! until Ctrl-C.

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use order_event_hub::{handle_connection, Dispatcher, HubConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=order_event_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("order_event_hub=info")),
        )
        .init();

    // Environment first, then the optional bind address argument
    let config = HubConfig::from_env()?;

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Event hub listening on {}", config.bind_addr);

    // Create Dispatcher actor and start
    let (dispatcher, hub) = Dispatcher::from_config(&config);
    let dispatcher_task = tokio::spawn(dispatcher.run());

    info!("Dispatcher actor started");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Connection accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let hub = hub.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    hub.shutdown();
    let _ = dispatcher_task.await;

    Ok(())
}
