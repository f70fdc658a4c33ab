// Mesh wire vocabulary — plain-text messages with case-sensitive prefix tags
//
// The mesh delivers opaque text with at-least-once, unordered semantics.
// Everything we put on it is one of the closed set of tagged forms below;
// anything else parses to `Unrecognized` and is ignored by the gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patient::PatientRecord;

/// Peer search broadcast, payload is the raw query string
pub const SEARCH_PREFIX: &str = "PatientSearch:";
/// Answer to a search broadcast, payload is JSON
pub const SEARCH_RESPONSE_PREFIX: &str = "PatientSearchResponse:";
/// Generic gateway envelope, payload is a nested command or raw JSON
pub const GATEWAY_PREFIX: &str = "PingToServer:";
/// Gateway search result, payload is free text, a JSON array, or pipe-separated names
pub const RESULTS_PREFIX: &str = "Results:";
/// Gateway create result, payload is `success - ...` or `error - ...`
pub const CREATE_RESULT_PREFIX: &str = "CreatePatientResult:";

/// Nested gateway search command
pub const CMD_SEARCH_PREFIX: &str = "/search?q=";
/// Nested gateway create command
pub const CMD_CREATE_PREFIX: &str = "/createpatient ";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON payload of a `PatientSearchResponse:` message.
///
/// `original_query` is the correlation key: the originator accepts the
/// response only while that exact query is still its outstanding search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponsePayload {
    pub sender_id: String,
    pub original_query: String,
    pub records: Vec<PatientRecord>,
    pub timestamp: u64,
}

/// A command nested inside a `PingToServer:` envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    /// `/search?q=<urlencoded term>`
    Search { term: String },
    /// `/createpatient <json>`
    CreatePatient { json: String },
    /// Anything else: raw JSON forwarded verbatim to the backend
    Passthrough { body: String },
}

/// A parsed inbound mesh message
#[derive(Debug, Clone)]
pub enum MeshInbound {
    /// `PatientSearch:` broadcast from a peer
    SearchBroadcast { query: String },
    /// `PatientSearchResponse:` answering a search broadcast
    SearchResponse(SearchResponsePayload),
    /// `PingToServer:` envelope with its nested command
    GatewayEnvelope(GatewayCommand),
    /// `Results:` gateway search result
    SearchResult { body: String },
    /// `CreatePatientResult:` gateway create result
    CreateResult { body: String },
    /// Not part of the vocabulary; ignored
    Unrecognized,
}

/// Parse one inbound mesh message. Never fails: unknown or malformed
/// payloads come back as `Unrecognized`.
pub fn parse_message(text: &str) -> MeshInbound {
    if let Some(payload) = text.strip_prefix(SEARCH_RESPONSE_PREFIX) {
        return match serde_json::from_str::<SearchResponsePayload>(payload.trim()) {
            Ok(response) => MeshInbound::SearchResponse(response),
            Err(_) => MeshInbound::Unrecognized,
        };
    }
    if let Some(payload) = text.strip_prefix(SEARCH_PREFIX) {
        return MeshInbound::SearchBroadcast {
            query: payload.trim().to_string(),
        };
    }
    if let Some(payload) = text.strip_prefix(GATEWAY_PREFIX) {
        return MeshInbound::GatewayEnvelope(parse_gateway_command(payload.trim()));
    }
    if let Some(payload) = text.strip_prefix(RESULTS_PREFIX) {
        return MeshInbound::SearchResult {
            body: payload.trim().to_string(),
        };
    }
    if let Some(payload) = text.strip_prefix(CREATE_RESULT_PREFIX) {
        return MeshInbound::CreateResult {
            body: payload.trim().to_string(),
        };
    }
    MeshInbound::Unrecognized
}

fn parse_gateway_command(payload: &str) -> GatewayCommand {
    if let Some(term) = payload.strip_prefix(CMD_SEARCH_PREFIX) {
        let term = urlencoding::decode(term)
            .map(|t| t.into_owned())
            .unwrap_or_else(|_| term.to_string());
        return GatewayCommand::Search { term };
    }
    if let Some(json) = payload.strip_prefix(CMD_CREATE_PREFIX) {
        return GatewayCommand::CreatePatient {
            json: json.trim().to_string(),
        };
    }
    GatewayCommand::Passthrough {
        body: payload.to_string(),
    }
}

/// Interpret a `Results:` body: a JSON array of records, a pipe-separated
/// name list, or free text treated as a single name. `error - ...` bodies
/// carry no records.
pub fn parse_results_body(body: &str) -> Vec<PatientRecord> {
    let body = body.trim();
    if body.is_empty() || body.starts_with("error") {
        return Vec::new();
    }
    if let Ok(records) = serde_json::from_str::<Vec<PatientRecord>>(body) {
        return records;
    }
    body.split('|')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(PatientRecord::new)
        .collect()
}

pub fn encode_search_broadcast(query: &str) -> String {
    format!("{SEARCH_PREFIX}{query}")
}

pub fn encode_search_response(payload: &SearchResponsePayload) -> Result<String, ProtocolError> {
    Ok(format!(
        "{SEARCH_RESPONSE_PREFIX}{}",
        serde_json::to_string(payload)?
    ))
}

pub fn encode_gateway_search(term: &str) -> String {
    format!(
        "{GATEWAY_PREFIX}{CMD_SEARCH_PREFIX}{}",
        urlencoding::encode(term)
    )
}

pub fn encode_gateway_create(json: &str) -> String {
    format!("{GATEWAY_PREFIX}{CMD_CREATE_PREFIX}{json}")
}

pub fn encode_gateway_passthrough(body: &str) -> String {
    format!("{GATEWAY_PREFIX}{body}")
}

pub fn encode_search_result(body: &str) -> String {
    format!("{RESULTS_PREFIX} {body}")
}

pub fn encode_create_result(body: &str) -> String {
    format!("{CREATE_RESULT_PREFIX} {body}")
}
