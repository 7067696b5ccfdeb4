// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use multiversion_application::AppState;
use multiversion_domain::HostEvent;
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct EventAck {
    /// Whether the body parsed as a host event and reached subscribers.
    pub published: bool,
}

/// Feed a host notification into the event bus.
///
/// Always answers 202: the caller gets no synchronous failure channel and
/// undecodable bodies are simply not published.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body(content = serde_json::Value, description = "Host event: {kind, occurred_at?, data?}"),
    responses(
        (status = 202, description = "Event accepted", body = EventAck)
    ),
    tag = "events"
)]
pub async fn publish_event(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let published = match serde_json::from_slice::<HostEvent>(&body) {
        Ok(event) => {
            debug!(target: "api", kind = %event.kind, "publishing host event");
            state.bus.publish_host_event(&event);
            true
        }
        Err(err) => {
            debug!(target: "api", error = %err, "ignoring undecodable event body");
            false
        }
    };

    (StatusCode::ACCEPTED, Json(EventAck { published }))
}
