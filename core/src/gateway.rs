// Mesh gateway — the protocol engine reconciling broadcast-style peer
// messaging with request/response semantics.
//
// A user action produces a command. Local data answers immediately; the
// command is also broadcast on the mesh so peers can contribute, and if
// this device is online the backend is called directly as well. Any online
// peer receiving a command it did not itself issue serves it against the
// backend and broadcasts a tagged response that only the originator
// accepts. Connectivity is re-checked at every decision point, never
// cached across a command's lifetime.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregate::{ResultAggregator, ResultSection};
use crate::backend::{RemoteBackend, SEARCH_RESULT_CAP};
use crate::connectivity::ConnectivityMonitor;
use crate::patient::{current_timestamp, PatientRecord};
use crate::protocol::{
    self, GatewayCommand, MeshInbound, SearchResponsePayload,
};
use crate::store::PatientRepository;
use crate::tracker::{RequestKind, RequestTracker};

/// The mesh radio, seen as an opaque broadcast channel. Delivery is
/// at-least-once and unordered; peers are named by stable string ids.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// This device's peer id, used to ignore our own broadcast echoes
    fn local_peer_id(&self) -> String;

    /// Broadcast a text message to every reachable peer
    async fn broadcast(&self, text: &str) -> anyhow::Result<()>;
}

/// Typed notifications to the presentation layer. One payload per event
/// kind; replaces the loosely-typed global event bus this design grew out of.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A peer's (or the backend's) search results were merged into the view
    RemoteSearchResults {
        peer_id: String,
        query: String,
        count: usize,
    },
    /// The search collection window closed; pending state is over
    SearchCompleted { query: String, any_results: bool },
    /// Terminal outcome of a create request (`success - ...` / `error - ...`)
    CreateResult { body: String },
    /// No gateway answered the create request in time
    CreateTimedOut,
    /// A local, pre-send failure (malformed payload, broadcast error)
    LocalError { message: String },
}

/// Gateway tuning knobs
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a search collects responses before its pending state clears
    pub search_timeout: Duration,
    /// How long a create waits for any gateway before giving up
    pub create_timeout: Duration,
    /// Section id used for results this device fetched from the backend itself
    pub backend_section_id: String,
    /// Event channel capacity
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(10),
            create_timeout: Duration::from_secs(15),
            backend_section_id: "server".to_string(),
            event_buffer: 64,
        }
    }
}

/// The protocol engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MeshGateway {
    transport: Arc<dyn MeshTransport>,
    backend: Arc<dyn RemoteBackend>,
    repository: PatientRepository,
    connectivity: ConnectivityMonitor,
    tracker: Arc<RequestTracker>,
    aggregator: Arc<Mutex<ResultAggregator>>,
    events: mpsc::Sender<GatewayEvent>,
    config: GatewayConfig,
}

impl MeshGateway {
    /// Build a gateway and the event stream its consumer drains
    pub fn new(
        transport: Arc<dyn MeshTransport>,
        backend: Arc<dyn RemoteBackend>,
        repository: PatientRepository,
        connectivity: ConnectivityMonitor,
        config: GatewayConfig,
    ) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_buffer);
        let gateway = Self {
            transport,
            backend,
            repository,
            connectivity,
            tracker: Arc::new(RequestTracker::new()),
            aggregator: Arc::new(Mutex::new(ResultAggregator::new())),
            events,
            config,
        };
        (gateway, events_rx)
    }

    /// Outstanding-request tracker (shared with all clones)
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Connectivity signal this gateway consults
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Current merged result sections
    pub fn sections(&self) -> Vec<ResultSection> {
        self.aggregator.lock().sections()
    }

    /// Current summary line
    pub fn display_message(&self) -> String {
        self.aggregator.lock().display_message()
    }

    // ------------------------------------------------------------------
    // Outbound: user-initiated commands
    // ------------------------------------------------------------------

    /// Start a patient search. Local results land immediately; the query is
    /// always broadcast on the mesh, and if this device is online the
    /// backend is called directly as well. Remote contributions merge as
    /// they arrive until the collection window closes.
    pub async fn submit_search(&self, query: &str) {
        let query = query.trim().to_string();
        if query.is_empty() {
            self.tracker.complete(RequestKind::Search);
            self.aggregator.lock().clear();
            return;
        }

        let generation = self.tracker.begin(RequestKind::Search, &query);
        info!(%query, "search started");

        let local = match self.repository.search(&query) {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "local repository search failed");
                Vec::new()
            }
        };
        {
            let mut agg = self.aggregator.lock();
            agg.begin_search(&query);
            agg.set_local_results(local);
        }

        // Broadcast regardless of connectivity: peers can answer even if
        // this device goes dark before the backend call returns.
        self.broadcast_or_report(&protocol::encode_search_broadcast(&query))
            .await;

        if self.connectivity.is_online() {
            self.spawn_direct_search(query.clone(), generation);
        }

        // Collection window: fires exactly once, and only for this request
        let gateway = self.clone();
        tokio::spawn(async move {
            if gateway
                .tracker
                .timeout(RequestKind::Search, generation, gateway.config.search_timeout)
                .await
            {
                let any_results = !gateway.sections().is_empty();
                gateway
                    .emit(GatewayEvent::SearchCompleted { query, any_results })
                    .await;
            }
        });
    }

    /// Submit a create-record request. The payload must be well-formed JSON;
    /// malformed payloads are rejected before anything is sent.
    pub async fn submit_create(&self, json: &str) {
        if serde_json::from_str::<serde_json::Value>(json).is_err() {
            warn!("rejecting malformed create payload");
            self.emit(GatewayEvent::LocalError {
                message: "create payload is not valid JSON".to_string(),
            })
            .await;
            return;
        }

        let generation = self.tracker.begin(RequestKind::Create, json);
        info!("create request started");

        self.broadcast_or_report(&protocol::encode_gateway_create(json))
            .await;

        if self.connectivity.is_online() {
            self.spawn_direct_create(json.to_string(), generation);
        }

        let gateway = self.clone();
        tokio::spawn(async move {
            if gateway
                .tracker
                .timeout(RequestKind::Create, generation, gateway.config.create_timeout)
                .await
            {
                gateway.emit(GatewayEvent::CreateTimedOut).await;
            }
        });
    }

    fn spawn_direct_search(&self, query: String, generation: u64) {
        let (abort, registration) = AbortHandle::new_pair();
        self.tracker
            .attach_abort(RequestKind::Search, generation, abort);

        let gateway = self.clone();
        tokio::spawn(async move {
            let call = Abortable::new(gateway.backend.search_patients(&query), registration);
            match call.await {
                Ok(Ok(records)) => {
                    // The request may have been superseded while we waited
                    if gateway.tracker.is_current(RequestKind::Search, &query) {
                        gateway
                            .accept_remote_results(
                                gateway.config.backend_section_id.clone(),
                                query,
                                records,
                                current_timestamp(),
                            )
                            .await;
                    }
                }
                Ok(Err(err)) => {
                    // Mesh gateways may still answer; the window resolves us
                    warn!(%err, "direct backend search failed");
                }
                Err(_aborted) => debug!("direct search aborted by supersession"),
            }
        });
    }

    fn spawn_direct_create(&self, json: String, generation: u64) {
        let (abort, registration) = AbortHandle::new_pair();
        self.tracker
            .attach_abort(RequestKind::Create, generation, abort);

        let gateway = self.clone();
        tokio::spawn(async move {
            let call = Abortable::new(gateway.backend.create_patient(&json), registration);
            match call.await {
                Ok(Ok(body)) => {
                    if gateway.tracker.is_current(RequestKind::Create, &json) {
                        gateway.tracker.complete(RequestKind::Create);
                        gateway
                            .emit(GatewayEvent::CreateResult {
                                body: format!("success - {body}"),
                            })
                            .await;
                    }
                }
                Ok(Err(err)) => {
                    warn!(%err, "direct backend create failed");
                }
                Err(_aborted) => debug!("direct create aborted by supersession"),
            }
        });
    }

    // ------------------------------------------------------------------
    // Inbound: mesh delivery callback
    // ------------------------------------------------------------------

    /// Handle one inbound mesh message. Dispatch order: create responses,
    /// search responses, gateway commands, passthrough envelopes.
    pub async fn handle_inbound(&self, from_peer: &str, text: &str) {
        if from_peer == self.transport.local_peer_id() {
            return; // own broadcast echo
        }

        match protocol::parse_message(text) {
            MeshInbound::CreateResult { body } => {
                self.accept_create_result(from_peer, body).await;
            }
            MeshInbound::SearchResponse(payload) => {
                self.accept_search_response(payload).await;
            }
            MeshInbound::SearchResult { body } => {
                self.accept_search_result(from_peer, body).await;
            }
            MeshInbound::SearchBroadcast { query } => {
                self.serve_search_broadcast(from_peer, query).await;
            }
            MeshInbound::GatewayEnvelope(command) => {
                self.serve_gateway_command(from_peer, command).await;
            }
            MeshInbound::Unrecognized => {
                debug!(%from_peer, "ignoring unrecognized mesh payload");
            }
        }
    }

    /// Rule 1: free-text create result, accepted only while a create
    /// request is outstanding. Acceptance is deliberately loose: gateway
    /// results carry no correlation id.
    async fn accept_create_result(&self, from_peer: &str, body: String) {
        if !self.tracker.has_outstanding(RequestKind::Create) {
            debug!(%from_peer, "dropping create result with no outstanding request");
            return;
        }
        info!(%from_peer, "create result accepted");
        self.tracker.complete(RequestKind::Create);
        self.emit(GatewayEvent::CreateResult { body }).await;
    }

    /// Rule 2a: structured search response. `originalQuery` is the
    /// correlation key; only an exact match against the current
    /// outstanding search is accepted.
    async fn accept_search_response(&self, payload: SearchResponsePayload) {
        if !self
            .tracker
            .is_current(RequestKind::Search, &payload.original_query)
        {
            debug!(
                sender = %payload.sender_id,
                query = %payload.original_query,
                "dropping search response for superseded or absent request"
            );
            return;
        }
        self.accept_remote_results(
            payload.sender_id,
            payload.original_query,
            payload.records,
            payload.timestamp,
        )
        .await;
    }

    /// Rule 2b: free-text gateway search result, accepted while any search
    /// is outstanding
    async fn accept_search_result(&self, from_peer: &str, body: String) {
        let Some(query) = self.tracker.current_payload(RequestKind::Search) else {
            debug!(%from_peer, "dropping gateway result with no outstanding search");
            return;
        };
        let records = protocol::parse_results_body(&body);
        self.accept_remote_results(from_peer.to_string(), query, records, current_timestamp())
            .await;
    }

    async fn accept_remote_results(
        &self,
        peer_id: String,
        query: String,
        records: Vec<PatientRecord>,
        timestamp: u64,
    ) {
        let count = records.len();
        self.aggregator
            .lock()
            .merge_remote(peer_id.clone(), records, timestamp);
        info!(%peer_id, %query, count, "merged remote search results");
        self.emit(GatewayEvent::RemoteSearchResults {
            peer_id,
            query,
            count,
        })
        .await;
    }

    /// Rule 3a: a peer's search broadcast. Only online devices answer;
    /// offline ones drop it silently and let some other peer serve it.
    async fn serve_search_broadcast(&self, from_peer: &str, query: String) {
        if !self.connectivity.is_online() {
            debug!(%from_peer, "offline, dropping peer search broadcast");
            return;
        }
        info!(%from_peer, %query, "serving peer search as gateway");

        let mut records = match self.repository.search(&query) {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "local search failed while serving peer");
                Vec::new()
            }
        };

        // Backend failure still produces a response: the originator's
        // pending state must always resolve to something.
        match self.backend.search_patients(&query).await {
            Ok(remote) => {
                let seen: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
                records.extend(remote.into_iter().filter(|r| !seen.contains(&r.id)));
            }
            Err(err) => warn!(%err, "backend search failed while serving peer"),
        }
        records.truncate(SEARCH_RESULT_CAP);

        let payload = SearchResponsePayload {
            sender_id: self.transport.local_peer_id(),
            original_query: query,
            records,
            timestamp: current_timestamp(),
        };
        match protocol::encode_search_response(&payload) {
            Ok(wire) => self.broadcast_or_report(&wire).await,
            Err(err) => warn!(%err, "failed to encode search response"),
        }
    }

    /// Rules 3b/4: nested gateway commands and passthrough envelopes
    async fn serve_gateway_command(&self, from_peer: &str, command: GatewayCommand) {
        // Malformed passthrough JSON is rejected before any connectivity
        // or forwarding decision, and never leaves this device.
        if let GatewayCommand::Passthrough { body } = &command {
            if serde_json::from_str::<serde_json::Value>(body).is_err() {
                warn!(%from_peer, "rejecting malformed passthrough JSON");
                self.emit(GatewayEvent::LocalError {
                    message: "passthrough envelope is not valid JSON".to_string(),
                })
                .await;
                return;
            }
        }

        if !self.connectivity.is_online() {
            debug!(%from_peer, "offline, dropping gateway command");
            return;
        }

        match command {
            GatewayCommand::Search { term } => {
                info!(%from_peer, %term, "serving gateway search");
                let body = match self.backend.search_patients(&term).await {
                    Ok(records) => {
                        serde_json::to_string(&records).unwrap_or_else(|e| format!("error - {e}"))
                    }
                    Err(err) => format!("error - {err}"),
                };
                self.broadcast_or_report(&protocol::encode_search_result(&body))
                    .await;
            }
            GatewayCommand::CreatePatient { json } => {
                info!(%from_peer, "serving gateway create");
                let body = if serde_json::from_str::<serde_json::Value>(&json).is_err() {
                    "error - payload is not valid JSON".to_string()
                } else {
                    match self.backend.create_patient(&json).await {
                        Ok(body) => format!("success - {body}"),
                        Err(err) => format!("error - {err}"),
                    }
                };
                self.broadcast_or_report(&protocol::encode_create_result(&body))
                    .await;
            }
            GatewayCommand::Passthrough { body } => {
                info!(%from_peer, "forwarding passthrough envelope");
                let result = match self.backend.forward_raw(&body).await {
                    Ok(response) => response,
                    Err(err) => format!("error - {err}"),
                };
                self.broadcast_or_report(&protocol::encode_search_result(&result))
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------

    async fn broadcast_or_report(&self, wire: &str) {
        if let Err(err) = self.transport.broadcast(wire).await {
            warn!(%err, "mesh broadcast failed");
            self.emit(GatewayEvent::LocalError {
                message: format!("mesh broadcast failed: {err}"),
            })
            .await;
        }
    }

    async fn emit(&self, event: GatewayEvent) {
        // A dropped receiver just means nobody is rendering
        let _ = self.events.send(event).await;
    }
}
