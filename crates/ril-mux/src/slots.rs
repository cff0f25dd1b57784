//! The set of configured slots

use std::collections::BTreeMap;

use tracing::{error, info};

use crate::config::RilConfig;
use crate::dispatch::CallbackSet;
use crate::error::MuxError;
use crate::slot::{SlotId, SlotManager};

/// All slots managed by one process, keyed by slot id
#[derive(Debug, Default)]
pub struct SlotSet {
    slots: BTreeMap<SlotId, SlotManager>,
}

impl SlotSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every configured slot
    ///
    /// If any slot fails to connect, the slots already connected are shut
    /// down and the error is returned.
    pub async fn connect(config: &RilConfig) -> Result<Self, MuxError> {
        config.validate()?;
        let options = config.slot_options();
        let mut set = Self::new();

        for slot_config in &config.slots {
            match SlotManager::connect(slot_config, options.clone()).await {
                Ok(manager) => {
                    set.insert(manager);
                }
                Err(e) => {
                    error!(slot = %slot_config.slot, endpoint = %slot_config.endpoint, "Failed to connect: {}", e);
                    set.shutdown().await;
                    return Err(e);
                }
            }
        }

        info!("Connected {} slot(s)", set.len());
        Ok(set)
    }

    /// Add a manager, replacing any with the same slot id
    pub fn insert(&mut self, manager: SlotManager) -> Option<SlotManager> {
        self.slots.insert(manager.slot(), manager)
    }

    /// Look up a slot
    pub fn get(&self, slot: SlotId) -> Result<&SlotManager, MuxError> {
        self.slots.get(&slot).ok_or(MuxError::SlotNotFound(slot))
    }

    /// Iterate slots in id order
    pub fn iter(&self) -> impl Iterator<Item = &SlotManager> {
        self.slots.values()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Install the same callback set on every slot
    pub fn register_callbacks_all(&self, callbacks: &CallbackSet) {
        for manager in self.slots.values() {
            manager.register_callbacks(callbacks.clone());
        }
    }

    /// Shut every slot down
    pub async fn shutdown(&self) {
        for manager in self.slots.values() {
            manager.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotOptions;

    #[tokio::test]
    async fn test_lookup() {
        let mut set = SlotSet::new();
        let (a, _peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);
        set.insert(SlotManager::spawn(SlotId(1), b, SlotOptions::default()));
        set.insert(SlotManager::spawn(SlotId(0), a, SlotOptions::default()));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(SlotId(1)).unwrap().slot(), SlotId(1));
        assert!(matches!(
            set.get(SlotId(2)),
            Err(MuxError::SlotNotFound(SlotId(2)))
        ));
        let ids: Vec<_> = set.iter().map(|m| m.slot()).collect();
        assert_eq!(ids, vec![SlotId(0), SlotId(1)]);
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let mut set = SlotSet::new();
        let (a, peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);
        set.insert(SlotManager::spawn(SlotId(0), a, SlotOptions::default()));
        set.insert(SlotManager::spawn(SlotId(1), b, SlotOptions::default()));

        drop(peer_a);
        set.get(SlotId(0)).unwrap().closed().await;

        assert!(set.get(SlotId(0)).unwrap().is_closed());
        assert!(!set.get(SlotId(1)).unwrap().is_closed());

        set.shutdown().await;
        assert!(set.iter().all(|m| m.is_closed()));
    }

    #[tokio::test]
    async fn test_connect_tcp_slots() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = tokio::spawn(async move {
            let mut peers = Vec::new();
            for _ in 0..2 {
                peers.push(listener.accept().await.unwrap().0);
            }
            peers
        });

        let config = RilConfig::from_json(&format!(
            r#"{{ "slots": [
                {{ "slot": 0, "endpoint": {{ "type": "tcp", "addr": "{addr}" }} }},
                {{ "slot": 1, "endpoint": {{ "type": "tcp", "addr": "{addr}" }} }}
            ] }}"#
        ))
        .unwrap();

        let set = SlotSet::connect(&config).await.unwrap();
        let _peers = acceptor.await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.get(SlotId(1)).unwrap().is_closed());
        set.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let config = RilConfig::from_json(
            r#"{ "slots": [ { "slot": 0, "endpoint": { "type": "unix", "path": "/nonexistent/ril.sock" } } ] }"#,
        )
        .unwrap();
        assert!(SlotSet::connect(&config).await.is_err());
    }
}
