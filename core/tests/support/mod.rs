// Shared harness for gateway integration tests: an in-memory mesh hub with
// broadcast semantics, plus a scriptable backend stub.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use medrelay_core::backend::BackendError;
use medrelay_core::{
    ConnectivityMonitor, GatewayConfig, GatewayEvent, MemoryStorage, MeshGateway, MeshTransport,
    PatientRecord, PatientRepository, RemoteBackend,
};

/// Transport that feeds every broadcast into a shared hub queue
pub struct HubTransport {
    peer_id: String,
    tx: mpsc::UnboundedSender<(String, String)>,
}

#[async_trait]
impl MeshTransport for HubTransport {
    fn local_peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn broadcast(&self, text: &str) -> anyhow::Result<()> {
        self.tx
            .send((self.peer_id.clone(), text.to_string()))
            .map_err(|e| anyhow::anyhow!("hub gone: {e}"))
    }
}

/// In-memory mesh: collects broadcasts and fans them out to every node
pub struct MeshHub {
    tx: mpsc::UnboundedSender<(String, String)>,
    rx: Mutex<mpsc::UnboundedReceiver<(String, String)>>,
    nodes: Mutex<Vec<MeshGateway>>,
}

impl MeshHub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            nodes: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self, peer_id: &str) -> Arc<HubTransport> {
        Arc::new(HubTransport {
            peer_id: peer_id.to_string(),
            tx: self.tx.clone(),
        })
    }

    pub fn register(&self, gateway: MeshGateway) {
        self.nodes.lock().push(gateway);
    }

    /// Deliver every queued broadcast to every node (including responses
    /// generated while pumping), until the mesh is quiet.
    pub async fn pump(&self) {
        loop {
            let next = self.rx.lock().try_recv();
            let Ok((from, text)) = next else { break };
            let nodes: Vec<MeshGateway> = self.nodes.lock().clone();
            for node in nodes {
                node.handle_inbound(&from, &text).await;
            }
        }
    }
}

/// Backend stub answering searches by substring over a canned record set
pub struct StubBackend {
    records: Vec<PatientRecord>,
    pub create_response: Result<String, String>,
}

impl StubBackend {
    pub fn with_records(names: &[&str]) -> Self {
        Self {
            records: names.iter().map(|n| PatientRecord::new(*n)).collect(),
            create_response: Ok("created".to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            create_response: Err("service unavailable".to_string()),
        }
    }
}

#[async_trait]
impl RemoteBackend for StubBackend {
    async fn search_patients(&self, name: &str) -> Result<Vec<PatientRecord>, BackendError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.matches(name))
            .cloned()
            .collect())
    }

    async fn create_patient(&self, _json: &str) -> Result<String, BackendError> {
        self.create_response
            .clone()
            .map_err(BackendError::Transport)
    }

    async fn forward_raw(&self, _json: &str) -> Result<String, BackendError> {
        Ok("forwarded".to_string())
    }
}

/// Build one mesh node and register it with the hub
pub fn spawn_node(
    hub: &MeshHub,
    peer_id: &str,
    online: bool,
    backend: StubBackend,
    local_names: &[&str],
) -> (MeshGateway, mpsc::Receiver<GatewayEvent>) {
    let repo = PatientRepository::new(Arc::new(MemoryStorage::new()));
    for name in local_names {
        repo.add(&PatientRecord::new(*name)).unwrap();
    }
    let (gateway, events) = MeshGateway::new(
        hub.transport(peer_id),
        Arc::new(backend),
        repo,
        ConnectivityMonitor::with_initial(online),
        GatewayConfig::default(),
    );
    hub.register(gateway.clone());
    (gateway, events)
}

/// Drain whatever events are immediately available
pub fn drain(rx: &mut mpsc::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned gateway tasks (timeouts, direct calls) run to their next
/// suspension point
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
