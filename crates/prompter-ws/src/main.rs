use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use prompter_core::{HandlerError, InputOutcome, MessageBus, Tool, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "prompter", about = "Session bus server for interactive tools")]
struct Args {
    /// Address to bind the websocket server on.
    #[arg(long, env = "PROMPTER_ADDR", default_value = "127.0.0.1:4850")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut registry = ToolRegistry::new();
    registry.register(
        Tool::new("Greet User", |io| async move {
            let name = match io.text_input("What is your name?", true).await {
                InputOutcome::Submitted(Some(name)) if !name.trim().is_empty() => name,
                InputOutcome::Submitted(_) => {
                    return Err(HandlerError::validation("A name is required."));
                }
                InputOutcome::Cancelled => return Err(HandlerError::InputCancelled),
            };
            Ok(json!({ "greeting": format!("Hello, {name}!") }))
        })
        .with_description("Asks for a name and replies with a greeting."),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_token.cancel();
        }
    });

    prompter_ws::serve(
        args.addr,
        Arc::new(MessageBus::new()),
        Arc::new(registry),
        shutdown,
    )
    .await
}
