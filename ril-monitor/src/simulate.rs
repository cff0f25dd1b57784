//! In-process virtual modems for running the monitor without hardware

use std::time::Duration;

use ril_mux::{SlotId, SlotManager, SlotOptions, SlotSet};
use ril_protocol::{Payload, Shape, Status};
use ril_sim::{run_virtual_modem, ModemControl, ModemRule, VirtualModem};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stock;

/// Virtual modems backing a simulated slot set
pub struct Simulation {
    controls: Vec<mpsc::Sender<ModemControl>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Start `count` virtual modems and a slot for each
    pub fn start(count: u8, options: &SlotOptions) -> anyhow::Result<(Self, SlotSet)> {
        let mut slots = SlotSet::new();
        let mut controls = Vec::new();
        let mut tasks = Vec::new();

        for n in 0..count {
            let (mux_io, modem_io) = tokio::io::duplex(64 * 1024);
            let (control_tx, control_rx) = mpsc::channel(16);
            let (activity_tx, _) = broadcast::channel(16);

            let modem = modem(n)?;
            tasks.push(tokio::spawn(async move {
                match run_virtual_modem(modem_io, modem, control_rx, activity_tx).await {
                    Ok(modem) => debug!("Virtual modem {} stopped", modem.id()),
                    Err(e) => warn!("Virtual modem sim{} failed: {}", n, e),
                }
            }));

            slots.insert(SlotManager::spawn(SlotId(n), mux_io, options.clone()));
            controls.push(control_tx);
        }

        Ok((Self { controls, tasks }, slots))
    }

    /// Push a signal strength indication from every modem
    pub async fn tick(&self, round: i32) -> anyhow::Result<()> {
        let payload = Shape::Ints.encode(&Payload::Ints(vec![10 + round % 20, 99]))?;
        for control in &self.controls {
            control
                .send(ModemControl::Indicate {
                    id: stock::SIGNAL_STRENGTH_IND,
                    payload: payload.clone(),
                    ack_expected: round % 2 == 0,
                })
                .await?;
        }
        Ok(())
    }

    /// Disconnect every modem and wait for them to stop
    pub async fn stop(self) {
        for control in &self.controls {
            let _ = control.send(ModemControl::Disconnect).await;
        }
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }
}

fn modem(n: u8) -> anyhow::Result<VirtualModem> {
    let operator = Shape::Strings.encode(&Payload::Strings(vec![
        Some("Simulated Carrier".into()),
        Some("SimCarrier".into()),
        Some(format!("3102{:02}", n)),
    ]))?;
    let baseband = Shape::String.encode(&Payload::string(format!("SIM-BB-{}", n)))?;

    Ok(VirtualModem::new(format!("sim{}", n))
        .with_rule(stock::SIGNAL_STRENGTH, ModemRule::ok(Shape::Ints.encode(&Payload::Ints(vec![18, 99]))?))
        .with_rule(stock::OPERATOR, ModemRule::ok(operator).ack_expected())
        .with_rule(stock::BASEBAND_VERSION, ModemRule::ok(baseband).early_ack())
        .with_rule(stock::RADIO_POWER, ModemRule::ok(Vec::new()))
        .with_rule(
            stock::GET_CURRENT_CALLS,
            ModemRule::fail(Status::RADIO_NOT_AVAILABLE),
        ))
}
