// THEORY:
// The HTTP surface is a thin shell over the aggregator's read API and the
// in-memory collaborators. Handlers never touch the zone loops; they read the
// store through the aggregator and mutate only reservations and zone metadata.
// Compiled only with the `web` feature.

use crate::aggregator::{AggregatedZoneView, ZoneAggregator};
use crate::collaborators::{InMemoryReservationLedger, InMemoryZoneDirectory, NewZone, ReservationRecord};
use crate::core_modules::occupancy::{ZoneId, ZoneOccupancyState};
use crate::error::AggregateError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: ZoneAggregator,
    pub directory: Arc<InMemoryZoneDirectory>,
    pub reservations: Arc<InMemoryReservationLedger>,
}

#[derive(Debug, Serialize)]
struct ZoneStateResponse {
    #[serde(flatten)]
    state: ZoneOccupancyState,
    timestamp: f64,
}

#[derive(Debug, Serialize)]
struct AllZonesResponse {
    zones: Vec<AggregatedZoneView>,
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct ReservationRequest {
    user: String,
    zone_id: ZoneId,
}

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

impl IntoResponse for AggregateError {
    fn into_response(self) -> Response {
        warn!(error = %self, "zone views unavailable");
        detail(StatusCode::SERVICE_UNAVAILABLE, self.to_string())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/parking/zones/:id", get(zone_state))
        .route("/api/parking/all", get(all_zones))
        .route("/api/reservations", post(create_reservation).delete(release_reservation))
        .route("/api/zones", post(add_zone))
        .route("/api/zones/:id", delete(delete_zone))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Parking OS Backend Live" }))
}

async fn zone_state(State(state): State<AppState>, Path(zone_id): Path<ZoneId>) -> Json<ZoneStateResponse> {
    Json(ZoneStateResponse {
        state: state.aggregator.get_zone_state(zone_id),
        timestamp: timestamp(),
    })
}

async fn all_zones(State(state): State<AppState>) -> Result<Json<AllZonesResponse>, AggregateError> {
    let zones = state.aggregator.get_all_zone_views()?;
    Ok(Json(AllZonesResponse {
        zones,
        timestamp: timestamp(),
    }))
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<ReservationRequest>,
) -> Result<(StatusCode, Json<ReservationRecord>), Response> {
    if state.directory.get(request.zone_id).is_none() {
        return Err(detail(StatusCode::NOT_FOUND, format!("zone {} not found", request.zone_id)));
    }
    let record = state.reservations.reserve(&request.user, request.zone_id);
    info!(zone_id = request.zone_id, user = %request.user, "reservation created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn release_reservation(State(state): State<AppState>, Json(request): Json<ReservationRequest>) -> Response {
    if state.reservations.release(&request.user, request.zone_id) {
        info!(zone_id = request.zone_id, user = %request.user, "reservation released");
        StatusCode::NO_CONTENT.into_response()
    } else {
        detail(StatusCode::NOT_FOUND, "reservation not found")
    }
}

async fn add_zone(State(state): State<AppState>, Json(zone): Json<NewZone>) -> (StatusCode, Json<serde_json::Value>) {
    let id = state.directory.add_zone(zone);
    info!(zone_id = id, "zone added");
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id })))
}

async fn delete_zone(State(state): State<AppState>, Path(zone_id): Path<ZoneId>) -> Response {
    match state.directory.get(zone_id) {
        None => detail(StatusCode::NOT_FOUND, format!("zone {zone_id} not found")),
        Some(zone) if zone.is_live => detail(StatusCode::CONFLICT, "live zones cannot be deleted"),
        Some(_) => {
            state.directory.delete_zone(zone_id);
            info!(zone_id, "zone deleted");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Serves the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "parking API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ZoneDirectory, ZoneMetadata};
    use crate::error::CollaboratorError;
    use crate::zone_store::{LoopPhase, ZoneStateStore};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn zone(id: ZoneId, total_slots: u32, is_live: bool) -> ZoneMetadata {
        ZoneMetadata {
            id,
            name: format!("Zone {id}"),
            lat: 0.0,
            lng: 0.0,
            total_slots,
            price: 5.0,
            is_live,
        }
    }

    fn app_state() -> AppState {
        let store = ZoneStateStore::new();
        store.register(1);
        store.publish(1, ZoneOccupancyState::from_counts(8, 6));
        store.set_phase(1, LoopPhase::Running);

        let directory = Arc::new(InMemoryZoneDirectory::new(vec![zone(1, 8, true), zone(2, 20, false)]));
        let reservations = Arc::new(InMemoryReservationLedger::default());
        let aggregator = ZoneAggregator::new(store, directory.clone(), reservations.clone());
        AppState {
            aggregator,
            directory,
            reservations,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let app = router(app_state());
        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Parking OS Backend Live");
    }

    #[tokio::test]
    async fn zone_state_is_raw_sensor_state() {
        let app = router(app_state());
        let (status, body) = send(&app, "GET", "/api/parking/zones/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_slots"], 8);
        assert_eq!(body["free_slots"], 6);
        assert_eq!(body["status"], "available");
        assert!(body["timestamp"].as_f64().is_some());

        let (_, unknown) = send(&app, "GET", "/api/parking/zones/42", None).await;
        assert_eq!(unknown["total_slots"], 0);
        assert_eq!(unknown["status"], "unknown");
    }

    #[tokio::test]
    async fn reservations_reduce_aggregated_free_slots() {
        let app = router(app_state());
        for user in ["ana", "ben"] {
            let (status, record) = send(
                &app,
                "POST",
                "/api/reservations",
                Some(serde_json::json!({ "user": user, "zone_id": 1 })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(record["zone_id"], 1);
        }

        let (status, body) = send(&app, "GET", "/api/parking/all", None).await;
        assert_eq!(status, StatusCode::OK);
        let zones = body["zones"].as_array().expect("zones");
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0]["free_slots"], 4);
        assert_eq!(zones[0]["status"], "filling");
        assert_eq!(zones[1]["free_slots"], 20);

        let release = serde_json::json!({ "user": "ana", "zone_id": 1 });
        let (status, _) = send(&app, "DELETE", "/api/reservations", Some(release.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", "/api/reservations", Some(release)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reservation_for_unknown_zone_is_not_found() {
        let app = router(app_state());
        let (status, _) = send(
            &app,
            "POST",
            "/api/reservations",
            Some(serde_json::json!({ "user": "ana", "zone_id": 99 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn zones_can_be_added_and_only_static_ones_deleted() {
        let app = router(app_state());
        let (status, body) = send(
            &app,
            "POST",
            "/api/zones",
            Some(serde_json::json!({
                "name": "Overflow", "lat": 1.0, "lng": 2.0, "total_slots": 12, "price": 3.0
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], 3);

        assert_eq!(send(&app, "DELETE", "/api/zones/1", None).await.0, StatusCode::CONFLICT);
        assert_eq!(send(&app, "DELETE", "/api/zones/3", None).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send(&app, "DELETE", "/api/zones/3", None).await.0, StatusCode::NOT_FOUND);
    }

    struct OfflineDirectory;

    impl ZoneDirectory for OfflineDirectory {
        fn list_zones(&self) -> Result<Vec<ZoneMetadata>, CollaboratorError> {
            Err(CollaboratorError::Unavailable {
                collaborator: "zone directory",
                reason: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn unavailable_collaborator_maps_to_503() {
        let mut state = app_state();
        state.aggregator = ZoneAggregator::new(
            state.aggregator.store().clone(),
            Arc::new(OfflineDirectory),
            state.reservations.clone(),
        );
        let app = router(state);
        let (status, body) = send(&app, "GET", "/api/parking/all", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].is_string());
    }
}
