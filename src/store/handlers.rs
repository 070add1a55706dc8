use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::{Serialize, de::DeserializeOwned};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use super::gateway::ReplicatedMap;
use super::protocol::{GetResponse, OpEnvelope, OpResponse, PutRequest, PutResponse};
use super::record::{RecordStore, apply_operation};
use crate::cluster::invoker::OperationOutcome;

pub async fn handle_put<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    let key: K = match req.key.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(PutResponse { success: false }),
            );
        }
    };

    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to deserialize value: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(PutResponse { success: false }),
            );
        }
    };

    match map.put(&req.map, key, value, req.ttl_ms).await {
        Ok(_) => (StatusCode::OK, Json(PutResponse { success: true })),
        Err(e) => {
            tracing::error!("Failed to put: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PutResponse { success: false }),
            )
        }
    }
}

pub async fn handle_get<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Path((map_name, key_str)): Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    let key: K = match key_str.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(GetResponse { value_json: None }),
            );
        }
    };

    match map.get(&map_name, &key).await {
        Ok(Some(value)) => match serde_json::to_string(&value) {
            Ok(value_json) => (
                StatusCode::OK,
                Json(GetResponse {
                    value_json: Some(value_json),
                }),
            ),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            ),
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(GetResponse { value_json: None }),
        ),
        Err(e) => {
            tracing::error!("Failed to get: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}

/// Internal endpoint: applies one `StoreOperation` addressed to a replica
/// hosted by this node. The operation only touches local state; any fan-out
/// already happened on the sending side.
pub async fn handle_operation<K, V>(
    Extension(store): Extension<Arc<RecordStore<K, V>>>,
    Json(envelope): Json<OpEnvelope>,
) -> (StatusCode, Json<OpResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    match apply_operation(&store, envelope.partition, envelope.op) {
        Ok(OperationOutcome::Ack) => (StatusCode::OK, Json(OpResponse::ack())),
        Ok(OperationOutcome::Value(value_json)) => {
            (StatusCode::OK, Json(OpResponse::value(value_json)))
        }
        Err(e) => {
            tracing::warn!(
                "Rejected operation for partition {}: {}",
                envelope.partition,
                e
            );
            (StatusCode::OK, Json(OpResponse::rejected(e.to_string())))
        }
    }
}
