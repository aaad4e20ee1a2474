//! Administrative HTTP surface.
//!
//! Inserts and lists manually created transaction events. It talks to storage
//! directly and never touches the topic.
use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::PersistError,
    sink::{checked_amount, scale_amount},
    transaction::{NewTransactionEvent, TransactionEvent},
};

/// Storage port used by the HTTP handlers.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(
        &self,
        event: NewTransactionEvent,
    ) -> Result<TransactionEvent, PersistError>;
    async fn list_events(&self) -> Result<Vec<TransactionEvent>, PersistError>;
}

pub type SharedStore = Arc<dyn EventStore>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventParams {
    pub card_last4: String,
    pub amount: String,
    pub merchant: String,
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Store(PersistError),
}

impl From<PersistError> for ApiError {
    fn from(err: PersistError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, "validation_error", message),
            ApiError::Store(e @ PersistError::StoreUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
            }
            ApiError::Store(e @ PersistError::ConstraintViolation(_)) => {
                (StatusCode::CONFLICT, "constraint_violation", e.to_string())
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/transactions
async fn create_event(
    State(store): State<SharedStore>,
    Query(params): Query<CreateEventParams>,
) -> Result<Json<TransactionEvent>, ApiError> {
    let amount = Decimal::from_str(params.amount.trim())
        .map_err(|e| ApiError::Validation(format!("amount {:?}: {e}", params.amount)))?;
    let amount = checked_amount(scale_amount(amount)).map_err(ApiError::Validation)?;
    let event = store
        .create_event(NewTransactionEvent {
            card_last4: params.card_last4,
            amount,
            merchant: params.merchant,
        })
        .await?;
    info!(id = event.id, merchant = %event.merchant, "transaction event created");
    Ok(Json(event))
}

/// GET /api/transactions
async fn list_events(
    State(store): State<SharedStore>,
) -> Result<Json<Vec<TransactionEvent>>, ApiError> {
    Ok(Json(store.list_events().await?))
}

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/transactions", get(list_events).post(create_event))
        .with_state(store)
}

/// Serves the admin router until `shutdown` resolves
pub async fn serve(
    listen: std::net::SocketAddr,
    store: SharedStore,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "admin http listening");
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_create_returns_stored_record() {
        let store = MemoryStore::new();
        let app = router(Arc::new(store.clone()));

        let (status, json) = send(
            app,
            "POST",
            "/api/transactions?cardLast4=1234&amount=10.00&merchant=Acme",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["id"].as_i64().is_some());
        assert!(json["createdAt"].is_string());
        assert_eq!(json["cardLast4"], "1234");
        assert_eq!(json["amount"], "10.00");
        assert_eq!(json["merchant"], "Acme");
        assert!(store.transactions().is_empty(), "pipeline table must be untouched");
    }

    #[tokio::test]
    async fn test_list_returns_created_records() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        for merchant in ["Acme", "Globex"] {
            let uri = format!("/api/transactions?cardLast4=9999&amount=5&merchant={merchant}");
            let (status, _) = send(router(store.clone()), "POST", &uri).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, json) = send(router(store), "GET", "/api/transactions").await;

        assert_eq!(status, StatusCode::OK);
        let merchants: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["merchant"].as_str().unwrap())
            .collect();
        assert_eq!(merchants, vec!["Acme", "Globex"]);
        assert_eq!(json[0]["amount"], "5.00");
    }

    #[tokio::test]
    async fn test_bad_amount_is_rejected() {
        let app = router(Arc::new(MemoryStore::new()));
        let (status, json) = send(
            app,
            "POST",
            "/api/transactions?cardLast4=1234&amount=ten&merchant=Acme",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");

        for amount in ["-3", "0.004", "1000000000000000000"] {
            let uri = format!("/api/transactions?cardLast4=1234&amount={amount}&merchant=Acme");
            let (status, _) = send(router(Arc::new(MemoryStore::new())), "POST", &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{amount}");
        }
    }

    #[tokio::test]
    async fn test_missing_parameter_is_rejected() {
        let app = router(Arc::new(MemoryStore::new()));
        let (status, _) = send(app, "POST", "/api/transactions?amount=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_503() {
        let store = MemoryStore::new();
        store.set_available(false);
        let (status, json) = send(router(Arc::new(store)), "GET", "/api/transactions").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "store_unavailable");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, json) = send(router(Arc::new(MemoryStore::new())), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}
