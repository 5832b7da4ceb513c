//! `localpipe client`: send values to a host, then the stop sentinel

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use localpipe_core::{message_queue, ClientService, Message};

use crate::PipeArgs;

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[command(flatten)]
    pipe: PipeArgs,

    /// Delay between values in milliseconds
    #[arg(short = 'i', long, default_value_t = 1000, value_name = "MS")]
    interval_ms: u64,

    /// Values to send: JSON, or plain text sent as a string.
    /// Without any, sends a short demo sequence.
    #[arg(value_name = "VALUE")]
    values: Vec<String>,
}

/// JSON when it parses, otherwise the raw text as a string
fn parse_value(raw: &str) -> Message {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Message::from)
        .unwrap_or_else(|_| Message::from(raw))
}

fn demo_values() -> Vec<Message> {
    vec![
        Message::from("varA"),
        Message::from(vec![0.0, 2.0]),
        Message::map([
            ("keyA", Message::Int(0)),
            ("keyB", Message::Float(8.6)),
            ("keyC", Message::from(vec![0.0, 1.0, 2.0])),
        ]),
    ]
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let config = args.pipe.load_config()?;
    let authkey = args.pipe.authkey()?.context(
        "An authkey is required: pass --authkey, --authkey-hex, or set LOCALPIPE_AUTHKEY",
    )?;

    let values = if args.values.is_empty() {
        demo_values()
    } else {
        args.values.iter().map(|raw| parse_value(raw)).collect()
    };

    let (outbox, rx) = message_queue();
    let client = ClientService::from_config(&config, authkey, rx)?
        .start()
        .await
        .context("Failed to connect to host")?;

    println!("Connected to {}", client.peer_addr());

    let mut pace = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for value in values {
        pace.tick().await;
        println!("-> {value}");
        if outbox.put(value).is_err() {
            // The client loop already ended; join reports why
            warn!("Client stopped before all values were queued");
            break;
        }
    }
    // Fails only if the loop already ended, which join reports
    let _ = outbox.put_stop();

    let summary = client.join().await.context("Client stopped with error")?;
    info!(messages_sent = summary.messages_sent, "Client finished");
    Ok(())
}
