//! `localpipe host`: run a listener and print what arrives

use anyhow::{Context, Result};
use clap::Args;
use tracing::{error, info, warn};

use localpipe_core::{message_queue, AuthKey, CancellationFlag, ListenerService, QueueError};

use crate::PipeArgs;

#[derive(Args, Debug)]
pub struct HostArgs {
    #[command(flatten)]
    pipe: PipeArgs,
}

pub async fn run(args: HostArgs) -> Result<()> {
    let config = args.pipe.load_config()?;
    let authkey = match args.pipe.authkey()? {
        Some(key) => key,
        None => {
            let key = AuthKey::generate();
            println!("Generated authkey; connect with: --authkey-hex {}", key.to_hex());
            key
        }
    };

    let cancel = CancellationFlag::new();
    let (tx, mut inbox) = message_queue();
    let listener = ListenerService::from_config(&config, tx, cancel.clone(), authkey)?
        .start()
        .await
        .context("Failed to start listener")?;

    println!("Listening on {}", listener.local_addr());

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, initiating shutdown");
                ctrl_c.set();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    // The listener drops its sender when it stops, which ends this loop
    loop {
        match inbox.get_timeout(config.cycle_time()).await {
            Ok(msg) => println!("{msg}"),
            Err(QueueError::Empty) if listener.is_finished() => break,
            Err(QueueError::Empty) => {}
            Err(QueueError::Closed) => break,
        }
    }

    match listener.join().await {
        Ok(summary) => {
            info!(
                accepted = summary.accepted,
                rejected = summary.rejected,
                delivered = summary.delivered,
                "Host stopped cleanly"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Listener stopped with error");
            Err(e.into())
        }
    }
}
