use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::engine::{render_line, LivenessRecord};
use crate::types::NodeStatus;

#[derive(Serialize)]
pub struct NodeResponse {
    pub node_id: String,
    pub service_name: String,
    pub declared_status: Option<NodeStatus>,
    pub last_heartbeat_at: Option<String>,
    pub last_seen_at: String,
    pub deregistered: bool,
    pub stale: bool,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

fn node_response(state: &AppState, record: LivenessRecord, now: Instant) -> NodeResponse {
    let stale = record.is_stale(now, state.staleness_threshold);
    let render = |ts: DateTime<Utc>| {
        state
            .zone
            .normalize(&ts)
            .to_rfc3339_opts(SecondsFormat::Micros, false)
    };
    NodeResponse {
        stale,
        last_heartbeat_at: record.last_heartbeat_at.map(|ts| render(ts)),
        last_seen_at: render(record.last_seen_at),
        node_id: record.node_id,
        service_name: record.service_name,
        declared_status: record.declared_status,
        deregistered: record.deregistered,
    }
}

pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeResponse>> {
    let now = Instant::now();
    let records = state.registry.snapshot().await;
    Json(
        records
            .into_iter()
            .map(|record| node_response(&state, record, now))
            .collect(),
    )
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    let record = state
        .registry
        .get(&node_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Node {} not seen", node_id)))?;
    Ok(Json(node_response(&state, record, Instant::now())))
}

/// Buffered envelopes in display order, timestamps in the display zone.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    if query.limit == Some(0) {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let display = state.display.read().await;
    let view = display.view();
    let skip = query
        .limit
        .map_or(0, |limit| view.len().saturating_sub(limit));

    let events = view[skip..]
        .iter()
        .map(|envelope| {
            let mut event = serde_json::to_value(envelope).unwrap_or(Value::Null);
            if let (Value::Object(fields), Some(ts)) = (&mut event, envelope.timestamp) {
                fields.insert(
                    "timestamp".to_string(),
                    Value::from(
                        state
                            .zone
                            .normalize(&ts)
                            .to_rfc3339_opts(SecondsFormat::Micros, false),
                    ),
                );
                fields.insert("line".to_string(), Value::from(render_line(envelope, &state.zone)));
            }
            event
        })
        .collect();
    Ok(Json(events))
}
