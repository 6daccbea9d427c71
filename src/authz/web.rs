use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::channel::parse_channel;
use crate::authz::errors::AccessError;
use crate::authz::pipeline::{read_context, AccessControl};
use crate::authz::types::{
    DecisionResponse, EmitBody, EmitRequest, ParseBody, ParseResponse, PublishBody,
    PublishInRequest, PublishOutRequest, ReadFilterBody, SubscribeBody, SubscribeRequest,
};

pub fn router(access: Arc<AccessControl>) -> Router {
    Router::new()
        .route("/v1/emit", post(handle_emit))
        .route("/v1/publish-in", post(handle_publish_in))
        .route("/v1/publish-out", post(handle_publish_out))
        .route("/v1/subscribe", post(handle_subscribe))
        .route("/v1/read-filter", post(handle_read_filter))
        .route("/v1/parse", post(handle_parse))
        .route("/healthz", get(health))
        .with_state(access)
}

fn respond(outcome: Result<(), AccessError>) -> Response {
    match outcome {
        Ok(()) => Json(DecisionResponse { allowed: true }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_emit(
    State(access): State<Arc<AccessControl>>,
    Json(body): Json<EmitBody>,
) -> impl IntoResponse {
    let req = EmitRequest {
        event: body.event,
        data: body.data,
        socket: Arc::new(body.socket),
    };
    respond(access.on_emit(&req).await)
}

async fn handle_publish_in(
    State(access): State<Arc<AccessControl>>,
    Json(body): Json<PublishBody>,
) -> impl IntoResponse {
    let req = PublishInRequest {
        channel: body.channel,
        data: body.data,
        socket: Arc::new(body.socket),
    };
    respond(access.on_publish_in(&req).await)
}

async fn handle_publish_out(
    State(access): State<Arc<AccessControl>>,
    Json(body): Json<PublishBody>,
) -> impl IntoResponse {
    let req = PublishOutRequest {
        channel: body.channel,
        data: body.data,
        socket: Arc::new(body.socket),
    };
    respond(access.on_publish_out(&req).await)
}

async fn handle_subscribe(
    State(access): State<Arc<AccessControl>>,
    Json(body): Json<SubscribeBody>,
) -> impl IntoResponse {
    let req = SubscribeRequest {
        channel: body.channel,
        socket: Arc::new(body.socket),
        allow_crud_access: body.allow_crud_access,
    };
    respond(access.on_subscribe(&req).await)
}

async fn handle_read_filter(
    State(access): State<Arc<AccessControl>>,
    Json(body): Json<ReadFilterBody>,
) -> impl IntoResponse {
    let ctx = read_context(Arc::new(body.socket), body.query, body.resource);
    respond(access.filter_outbound_read(&ctx).await)
}

async fn handle_parse(Json(body): Json<ParseBody>) -> impl IntoResponse {
    Json(ParseResponse {
        query: parse_channel(&body.channel),
    })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
