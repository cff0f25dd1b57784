//! RIL Monitor
//!
//! Connects every configured radio slot, installs the stock dispatch table
//! and logs commands, responses and indications until interrupted.

mod simulate;
mod stock;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ril_mux::{
    CallbackSet, DefaultRadioFunctions, Indication, RilConfig, SlotEvent, SlotManager, SlotSet,
};
use ril_protocol::Payload;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::simulate::Simulation;

/// Radio interface layer traffic monitor
#[derive(Debug, Parser)]
#[command(name = "ril-monitor", version, about)]
struct Args {
    /// Path to the JSON slot configuration
    #[arg(short, long, required_unless_present = "simulate")]
    config: Option<PathBuf>,

    /// Run against this many in-process virtual modems instead of real endpoints
    #[arg(long, value_name = "SLOTS")]
    simulate: Option<u8>,

    /// Seconds between signal strength polls on every slot (0 disables polling)
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Log every frame and ack at info level
    #[arg(long)]
    traffic: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ril_monitor=info,ril_mux=info,ril_protocol=info,ril_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting RIL monitor");

    let config = match &args.config {
        Some(path) => RilConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RilConfig::default(),
    };

    let (simulation, slots) = match args.simulate {
        Some(count) => {
            info!("Simulating {} slot(s)", count);
            let (simulation, slots) = Simulation::start(count, &config.slot_options())?;
            (Some(simulation), slots)
        }
        None => (
            None,
            SlotSet::connect(&config)
                .await
                .context("failed to connect slots")?,
        ),
    };

    let callbacks = CallbackSet::new(stock::table(), Arc::new(DefaultRadioFunctions));
    slots.register_callbacks_all(&callbacks);

    let (ind_tx, ind_rx) = mpsc::unbounded_channel();
    for slot in slots.iter() {
        slot.set_indication_listener(ind_tx.clone());
        tokio::spawn(log_events(slot.subscribe(), args.traffic));
    }
    drop(ind_tx);
    tokio::spawn(log_indications(ind_rx));

    let mut poll_timer = (args.poll_interval > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.poll_interval)));
    let mut round = 0i32;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("Interrupted, shutting down");
                break;
            }

            _ = tick(&mut poll_timer) => {
                round = round.wrapping_add(1);
                for slot in slots.iter() {
                    poll(slot).await;
                }
                if let Some(simulation) = &simulation {
                    simulation.tick(round).await?;
                }
            }
        }

        if slots.iter().all(SlotManager::is_closed) {
            warn!("All slots closed");
            break;
        }
    }

    slots.shutdown().await;
    if let Some(simulation) = simulation {
        simulation.stop().await;
    }
    Ok(())
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn poll(slot: &SlotManager) {
    if slot.is_closed() {
        return;
    }
    match slot.call(stock::SIGNAL_STRENGTH, &Payload::Void).await {
        Ok(response) => match response.result {
            Ok(payload) => info!(slot = %slot.slot(), status = %response.status, "Signal strength: {:?}", payload),
            Err(e) => warn!(slot = %slot.slot(), status = %response.status, "Signal strength failed: {}", e),
        },
        Err(e) => error!(slot = %slot.slot(), "Signal strength request failed: {}", e),
    }
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<SlotEvent>, traffic: bool) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Event monitor lagged, {} event(s) skipped", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if event.is_traffic() {
            if traffic {
                info!(slot = %event.slot(), "{:?}", event);
            } else {
                debug!(slot = %event.slot(), "{:?}", event);
            }
        } else if event.is_anomaly() {
            warn!(slot = %event.slot(), "{:?}", event);
        } else {
            info!(slot = %event.slot(), "{:?}", event);
        }

        if matches!(event, SlotEvent::Disconnected { .. }) {
            break;
        }
    }
}

async fn log_indications(mut rx: mpsc::UnboundedReceiver<Indication>) {
    while let Some(indication) = rx.recv().await {
        match indication.result {
            Ok(payload) => info!(slot = %indication.slot, indication = %indication.id, "{:?}", payload),
            Err(e) => warn!(slot = %indication.slot, indication = %indication.id, "Undecodable indication: {}", e),
        }
    }
}
