/**
 * API HTTP - Réception des rapports et consultation des séries
 *
 * ROUTES :
 * - POST /api/utilization              : push d'un rapport de nœud (201 / 422)
 * - GET  /health, /system/health       : liveness et état du kernel
 * - GET  /clusters, /clusters/{key}/nodes
 * - GET  /nodes/{handle}               : fiche d'un nœud
 * - GET  /nodes/{handle}/utilization   : série CPU/mémoire (?from&to RFC 3339, défaut dernière heure)
 * - GET  /nodes/{handle}/power         : série puissance
 * - GET  /nodes/{handle}/samples       : les deux séries jointes par cycle
 *
 * Node reports are not authenticated.
 */

use crate::error::IngestError;
use crate::health::{HealthTracker, KernelHealth};
use crate::ingest::Ingestor;
use crate::models::{Cluster, ClusterKey, Node, NodeHandle, NodeReport, PowerSample, UtilizationSample};
use crate::retention::RetentionSweeper;
use crate::store::SamplePair;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tracing::{error, warn};

const DEFAULT_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub sweeper: Option<RetentionSweeper>,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/utilization", post(post_report))
        .route("/clusters", get(list_clusters))
        .route("/clusters/{key}/nodes", get(list_nodes))
        .route("/nodes/{handle}", get(get_node))
        .route("/nodes/{handle}/utilization", get(get_utilization))
        .route("/nodes/{handle}/power", get(get_power))
        .route("/nodes/{handle}/samples", get(get_samples))
        .with_state(app_state)
}

#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
    limit: Option<usize>,
}

struct Range {
    from: OffsetDateTime,
    to: OffsetDateTime,
    limit: usize,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(code: StatusCode, msg: impl std::fmt::Display) -> ApiError {
    (code, Json(json!({ "error": msg.to_string() })))
}

impl RangeParams {
    fn resolve(&self, now: OffsetDateTime) -> Result<Range, ApiError> {
        let parse = |v: &Option<String>, name: &str| -> Result<Option<OffsetDateTime>, ApiError> {
            v.as_deref()
                .map(|s| OffsetDateTime::parse(s, &Rfc3339))
                .transpose()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid `{name}`: {e}")))
        };
        let to = parse(&self.to, "to")?.unwrap_or(now);
        let from = parse(&self.from, "from")?.unwrap_or(to - Duration::hours(1));
        Ok(Range {
            from,
            to,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        })
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let health = app
        .health_tracker
        .get_health(app.ingestor.catalog(), app.ingestor.store(), app.sweeper.as_ref());
    Json(health)
}

// POST /api/utilization
async fn post_report(
    State(app): State<AppState>,
    Json(report): Json<NodeReport>,
) -> (StatusCode, Json<serde_json::Value>) {
    match app.ingestor.ingest(&report) {
        Ok(node) => (StatusCode::CREATED, Json(json!({ "node": node }))),
        Err(IngestError::Validation(e)) => {
            warn!(cluster = ?report.cluster_id, node = ?report.node_id, "pushed report rejected: {e}");
            api_error(StatusCode::UNPROCESSABLE_ENTITY, e)
        }
        Err(e) => {
            error!("pushed report not stored: {e}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

// GET /clusters
async fn list_clusters(State(app): State<AppState>) -> Json<Vec<Cluster>> {
    Json(app.ingestor.catalog().clusters())
}

// GET /clusters/{key}/nodes
async fn list_nodes(
    State(app): State<AppState>,
    Path(key): Path<ClusterKey>,
) -> Result<Json<Vec<Node>>, StatusCode> {
    let catalog = app.ingestor.catalog();
    if catalog.cluster(key).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(catalog.nodes(key)))
}

// GET /nodes/{handle}
async fn get_node(State(app): State<AppState>, Path(handle): Path<u64>) -> Result<Json<Node>, StatusCode> {
    app.ingestor
        .catalog()
        .node(NodeHandle(handle))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

fn known_node(app: &AppState, handle: u64) -> Result<NodeHandle, ApiError> {
    let handle = NodeHandle(handle);
    match app.ingestor.catalog().node(handle) {
        Some(_) => Ok(handle),
        None => Err(api_error(StatusCode::NOT_FOUND, format!("unknown node {handle}"))),
    }
}

// GET /nodes/{handle}/utilization
async fn get_utilization(
    State(app): State<AppState>,
    Path(handle): Path<u64>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<UtilizationSample>>, ApiError> {
    let node = known_node(&app, handle)?;
    let range = params.resolve(OffsetDateTime::now_utc())?;
    let rows = app.ingestor.store().query_utilization(node, range.from, range.to);
    Ok(Json(rows.iter().take(range.limit).collect()))
}

// GET /nodes/{handle}/power
async fn get_power(
    State(app): State<AppState>,
    Path(handle): Path<u64>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<PowerSample>>, ApiError> {
    let node = known_node(&app, handle)?;
    let range = params.resolve(OffsetDateTime::now_utc())?;
    let rows = app.ingestor.store().query_power(node, range.from, range.to);
    Ok(Json(rows.iter().take(range.limit).collect()))
}

// GET /nodes/{handle}/samples
async fn get_samples(
    State(app): State<AppState>,
    Path(handle): Path<u64>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<SamplePair>>, ApiError> {
    let node = known_node(&app, handle)?;
    let range = params.resolve(OffsetDateTime::now_utc())?;
    let pairs = app.ingestor.store().query_range(node, range.from, range.to);
    Ok(Json(pairs.iter().take(range.limit).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IdentityCatalog;
    use crate::ingest::ClusterProfiles;
    use crate::state::Database;
    use crate::store::SampleStore;
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Ingestor) {
        let db = Database::in_memory().shared();
        let ingestor = Ingestor::new(IdentityCatalog::new(db.clone()), SampleStore::new(db), ClusterProfiles::default());
        let state = AppState {
            ingestor: ingestor.clone(),
            sweeper: None,
            health_tracker: HealthTracker::new(),
        };
        (build_router(state), ingestor)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/utilization")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const REPORT: &str = r#"{"clusterId":2,"nodeId":1,"memoryFree":5,"memoryUsed":100000,
        "nodeIp":"5.4.3.1","cores":[50.0,50.0],"os":"L4T","uptime":10,"frequency":1,
        "power":{"current":10.0,"voltage":5.0}}"#;

    #[tokio::test]
    async fn test_push_creates_node_and_returns_handle() {
        let (app, ingestor) = app();

        let resp = app.clone().oneshot(post(REPORT)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        let handle = body["node"].as_u64().unwrap();

        let resp = app.clone().oneshot(post(REPORT)).await.unwrap();
        assert_eq!(json_body(resp).await["node"].as_u64(), Some(handle));
        assert_eq!(ingestor.store().utilization_rows(), 2);

        let resp = app.clone().oneshot(get("/clusters/2/nodes")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let nodes = json_body(resp).await;
        assert_eq!(nodes[0]["address"], "5.4.3.1");

        let resp = app.oneshot(get(&format!("/nodes/{handle}/power"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = json_body(resp).await;
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[0]["power"].as_f64(), Some(50.0));
    }

    #[tokio::test]
    async fn test_push_with_invalid_payload_is_unprocessable() {
        let (app, ingestor) = app();

        let resp = app.clone().oneshot(post(r#"{"nodeId":1,"cores":[10.0]}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(resp).await["error"], "missing cluster id");

        let resp = app.oneshot(post(r#"{"clusterId":1,"nodeId":1,"cores":[180.0]}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ingestor.catalog().cluster_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_and_cluster_are_not_found() {
        let (app, _) = app();
        let resp = app.clone().oneshot(get("/nodes/42/utilization")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = app.oneshot(get("/clusters/9/nodes")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_range_query_parses_bounds() {
        let (app, ingestor) = app();
        let report: NodeReport = serde_json::from_str(REPORT).unwrap();
        let t0 = time::macros::datetime!(2020-03-27 00:00:00 UTC);
        let handle = ingestor.ingest_at(&report, t0).unwrap();
        ingestor.ingest_at(&report, t0 + Duration::minutes(10)).unwrap();

        let uri = format!(
            "/nodes/{}/utilization?from=2020-03-27T00:00:00Z&to=2020-03-27T00:05:00Z",
            handle.0
        );
        let resp = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = json_body(resp).await;
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["timestamp"], "2020-03-27T00:00:00Z");

        let uri = format!("/nodes/{}/samples?from=2020-03-27T00:00:00Z&to=2020-03-28T00:00:00Z", handle.0);
        let pairs = json_body(app.clone().oneshot(get(&uri)).await.unwrap()).await;
        assert_eq!(pairs.as_array().unwrap().len(), 2);
        assert!(pairs[1]["power"].is_object());

        let resp = app.oneshot(get(&format!("/nodes/{}/power?from=yesterday", handle.0))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_system_health_counts_nodes() {
        let (app, _) = app();
        app.clone().oneshot(post(REPORT)).await.unwrap();
        let health = json_body(app.oneshot(get("/system/health")).await.unwrap()).await;
        assert_eq!(health["nodes_tracked"], 1);
        assert_eq!(health["utilization_rows"], 1);
    }
}
