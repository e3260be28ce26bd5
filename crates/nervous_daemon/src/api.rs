use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use nervous_core::immune::Antibody;
use nervous_core::maintenance::MaintenanceReport;
use nervous_core::reflex::{ReflexArc, ReflexCondition};
use nervous_core::{
    ActionKind, DeliveryFollowUp, DeliveryResult, DeliveryTicket, Disposition, Fabric, FabricError,
    NervousSystemStatus, NeuronId, ProcessOutcome, ReflexArcId, WebhookEvent,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::deliveries::DeliveryLedger;

#[derive(Clone)]
pub struct ApiState {
    pub fabric: Arc<Fabric>,
    pub ledger: Arc<DeliveryLedger>,
    pub default_destination: NeuronId,
}

// Response types
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    health: f64,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
}

pub struct ApiError(StatusCode, String);

impl From<FabricError> for ApiError {
    fn from(e: FabricError) -> Self {
        let status = match e {
            FabricError::UnknownNeuron(_)
            | FabricError::UnknownHypha(_)
            | FabricError::UnknownAntigen(_)
            | FabricError::UnknownAnt(_)
            | FabricError::UnknownTrail(_)
            | FabricError::UnknownReflexArc(_) => StatusCode::NOT_FOUND,
            FabricError::MalformedEvent { .. }
            | FabricError::InvalidConfig(_)
            | FabricError::SelfAlternative(_)
            | FabricError::Serialization(_) => StatusCode::BAD_REQUEST,
            FabricError::NoEffectiveAntibody { .. } => StatusCode::CONFLICT,
            FabricError::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

#[derive(Deserialize)]
pub struct EventsRequest {
    destination: Option<String>,
    events: Vec<WebhookEvent>,
}

#[derive(Deserialize)]
pub struct ReflexArcRequest {
    condition: ReflexCondition,
    target: String,
    action: ActionKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    success: bool,
    #[serde(default)]
    latency_ms: Option<f64>,
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    enabled: bool,
}

// Handlers
async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        health: state.fabric.status().health,
    })
}

async fn get_status(State(state): State<ApiState>) -> Json<NervousSystemStatus> {
    Json(state.fabric.status())
}

async fn post_events(
    State(state): State<ApiState>,
    Json(req): Json<EventsRequest>,
) -> Result<Json<Vec<ProcessOutcome>>, ApiError> {
    let destination = req
        .destination
        .map(NeuronId::from)
        .unwrap_or_else(|| state.default_destination.clone());
    let outcomes = state.fabric.process_batch(req.events, &destination)?;

    let routed = outcomes.iter().filter_map(|o| match &o.disposition {
        Disposition::Routed { ticket } => Some(ticket.clone()),
        _ => None,
    });
    state.ledger.track_all(routed).await;
    Ok(Json(outcomes))
}

async fn get_deliveries(State(state): State<ApiState>) -> Json<Vec<DeliveryTicket>> {
    Json(state.ledger.outstanding().await)
}

async fn complete_delivery(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(report): Json<DeliveryReport>,
) -> Result<Json<DeliveryFollowUp>, ApiError> {
    let ticket = state
        .ledger
        .take(id)
        .await
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("unknown delivery ticket: {}", id)))?;
    let result = if report.success {
        DeliveryResult::success(report.latency_ms.unwrap_or(0.0))
    } else {
        DeliveryResult::failure()
    };

    let follow_up = state.fabric.complete_delivery(ticket, result)?;
    if let DeliveryFollowUp::Rerouted { ticket } = &follow_up {
        state.ledger.track(ticket.clone()).await;
    }
    Ok(Json(follow_up))
}

async fn run_maintenance(State(state): State<ApiState>) -> Json<MaintenanceReport> {
    Json(crate::maintenance::run_once(&state.fabric, &state.ledger).await)
}

async fn get_reflex_arcs(State(state): State<ApiState>) -> Json<Vec<ReflexArc>> {
    Json(state.fabric.reflexes().arcs())
}

async fn post_reflex_arc(
    State(state): State<ApiState>,
    Json(req): Json<ReflexArcRequest>,
) -> Result<(StatusCode, Json<ReflexArc>), ApiError> {
    let id = state
        .fabric
        .register_reflex_arc(req.condition, req.target, req.action)?;
    let arc = state
        .fabric
        .reflexes()
        .arc(id)
        .ok_or(FabricError::UnknownReflexArc(id))?;
    Ok((StatusCode::CREATED, Json(arc)))
}

async fn toggle_reflex_arc(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ReflexArc>, ApiError> {
    let arc = state.fabric.set_reflex_enabled(ReflexArcId(id), req.enabled)?;
    info!(arc = %arc.id, enabled = arc.enabled, "Reflex arc toggled");
    Ok(Json(arc))
}

async fn get_antibodies(State(state): State<ApiState>) -> Json<Vec<Antibody>> {
    Json(state.fabric.immune().antibodies())
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/events", post(post_events))
        .route("/api/deliveries", get(get_deliveries))
        .route("/api/deliveries/:id", post(complete_delivery))
        .route("/api/maintenance", post(run_maintenance))
        .route("/api/reflex-arcs", get(get_reflex_arcs).post(post_reflex_arc))
        .route("/api/reflex-arcs/:id", post(toggle_reflex_arc))
        .route("/api/antibodies", get(get_antibodies))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn run_api_server(state: ApiState, port: u16, public: bool) -> anyhow::Result<()> {
    let app = router(state);

    let addr = if public || std::env::var("NERVOUS_PUBLIC").is_ok() {
        format!("0.0.0.0:{}", port)
    } else {
        format!("127.0.0.1:{}", port)
    };
    info!(addr = %addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nervous_core::{FabricConfig, NoopExecutor, Severity};
    use serde_json::json;

    fn state() -> ApiState {
        let fabric = Fabric::new(FabricConfig::default(), Arc::new(NoopExecutor)).unwrap();
        ApiState {
            fabric: Arc::new(fabric),
            ledger: Arc::new(DeliveryLedger::new()),
            default_destination: "sink".into(),
        }
    }

    fn push(id: &str) -> WebhookEvent {
        WebhookEvent::new(id, "github", "push", json!({"ref": "main"}), Severity::Low)
    }

    #[tokio::test]
    async fn test_routed_events_are_tracked_and_completed() {
        let state = state();
        state
            .fabric
            .mycelium()
            .create_hypha("core", "github", "sink", 90.0)
            .unwrap();

        let Json(outcomes) = post_events(
            State(state.clone()),
            Json(EventsRequest {
                destination: None,
                events: vec![push("e1")],
            }),
        )
        .await
        .ok()
        .unwrap();
        let Disposition::Routed { ticket } = &outcomes[0].disposition else {
            panic!("event was not routed");
        };
        assert_eq!(state.ledger.outstanding().await.len(), 1);

        let Json(follow_up) = complete_delivery(
            State(state.clone()),
            Path(ticket.id),
            Json(DeliveryReport {
                success: true,
                latency_ms: Some(25.0),
            }),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(follow_up, DeliveryFollowUp::Delivered);
        assert!(state.ledger.outstanding().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_not_found() {
        let state = state();
        let err = complete_delivery(
            State(state),
            Path(42),
            Json(DeliveryReport {
                success: true,
                latency_ms: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reflex_arc_registration_and_toggle() {
        let state = state();
        state.fabric.topology().upsert_neuron("billing");
        let (status, Json(arc)) = post_reflex_arc(
            State(state.clone()),
            Json(ReflexArcRequest {
                condition: ReflexCondition::SourceType("stripe".to_string()),
                target: "billing".to_string(),
                action: ActionKind::CreateTask,
            }),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(arc.enabled);

        let Json(arc) = toggle_reflex_arc(State(state.clone()), Path(arc.id.0), Json(ToggleRequest { enabled: false }))
            .await
            .ok()
            .unwrap();
        assert!(!arc.enabled);
        let Json(arcs) = get_reflex_arcs(State(state)).await;
        assert_eq!(arcs.len(), 1);
    }

    #[tokio::test]
    async fn test_reflex_arc_for_unknown_target_maps_to_404() {
        let state = state();
        let err = post_reflex_arc(
            State(state.clone()),
            Json(ReflexArcRequest {
                condition: ReflexCondition::SourceType("stripe".to_string()),
                target: "nowhere".to_string(),
                action: ActionKind::Notify,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        let Json(arcs) = get_reflex_arcs(State(state)).await;
        assert!(arcs.is_empty());
    }

    #[tokio::test]
    async fn test_critical_event_is_routed() {
        let state = state();
        state
            .fabric
            .mycelium()
            .create_hypha("core", "github", "sink", 90.0)
            .unwrap();
        let critical = WebhookEvent::new("c1", "github", "push", json!({"ref": "main"}), Severity::Critical);
        let Json(outcomes) = post_events(
            State(state.clone()),
            Json(EventsRequest {
                destination: None,
                events: vec![critical, push("c2")],
            }),
        )
        .await
        .ok()
        .unwrap();
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.disposition, Disposition::Routed { .. })));
        assert_eq!(state.ledger.outstanding().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_reflex_arc_maps_to_404() {
        let err = toggle_reflex_arc(State(state()), Path(9), Json(ToggleRequest { enabled: true }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_reports_quarantine() {
        let state = state();
        let hostile = WebhookEvent::new(
            "x1",
            "forms",
            "submit",
            json!({"q": "<script>alert(1)</script>"}),
            Severity::Low,
        );
        let Json(outcomes) = post_events(
            State(state.clone()),
            Json(EventsRequest {
                destination: Some("sink".to_string()),
                events: vec![hostile],
            }),
        )
        .await
        .ok()
        .unwrap();
        assert!(matches!(outcomes[0].disposition, Disposition::Quarantined { .. }));

        let Json(status) = get_status(State(state.clone())).await;
        assert_eq!(status.immune_system.antigens, 1);
        let Json(antibodies) = get_antibodies(State(state)).await;
        assert!(!antibodies.is_empty());
    }
}
