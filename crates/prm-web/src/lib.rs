//! Axum JSON API for the PRM sync service.
//!
//! Handlers stay thin: request validation here, pipeline semantics in
//! `prm-sync`, persistence behind the `PrmStore`/`SettingsStore` traits so
//! the router runs identically against Postgres or the in-memory store.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prm_core::{Deal, DealStatus, Lead, Partner};
use prm_hubspot::{CrmConnector, HubSpotConnector, RawContact, RawDeal};
use prm_storage::{MemorySettings, MemoryStore, PortalSettings, PrmStore, SettingsStore};
use prm_sync::{
    export_deals_csv, export_leads_csv, export_partners_csv, ingest_contact_webhook,
    ingest_deal_webhook, parse_deals_csv, parse_leads_csv, parse_partners_csv, run_migration,
    run_sync, WebhookError,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const CRATE_NAME: &str = "prm-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PrmStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub connector: Arc<dyn CrmConnector>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PrmStore>,
        settings: Arc<dyn SettingsStore>,
        connector: Arc<dyn CrmConnector>,
    ) -> Self {
        Self {
            store,
            settings,
            connector,
        }
    }

    /// Token-free local state: in-memory collections, real CRM connector.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySettings::new()),
            Arc::new(HubSpotConnector::new()),
        )
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/migrate", get(migrate_ready_handler).post(migrate_handler))
        .route("/sync", get(sync_ready_handler).post(sync_handler))
        .route(
            "/webhooks/crm/deals",
            get(deal_webhook_ready_handler).post(deal_webhook_handler),
        )
        .route(
            "/webhooks/crm/contacts",
            get(contact_webhook_ready_handler).post(contact_webhook_handler),
        )
        .route(
            "/partners",
            get(list_partners_handler)
                .post(create_partner_handler)
                .delete(delete_partner_handler),
        )
        .route("/partners/top", get(top_partners_handler))
        .route(
            "/deals",
            get(list_deals_handler)
                .post(create_deal_handler)
                .delete(delete_deal_handler),
        )
        .route(
            "/leads",
            get(list_leads_handler)
                .post(create_lead_handler)
                .delete(delete_lead_handler),
        )
        .route("/upload/{kind}", post(upload_handler))
        .route("/import/{kind}", post(import_csv_handler))
        .route("/export/{kind}", get(export_csv_handler))
        .route("/analytics/overview", get(overview_handler))
        .route("/notifications", get(notifications_handler))
        .route(
            "/settings",
            get(get_settings_handler)
                .put(put_settings_handler)
                .delete(reset_settings_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "prm api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Access token for the CRM, accepted under both the current and the legacy
/// body key.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CrmTokenRequest {
    #[serde(alias = "hubspotApiKey")]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(default)]
    data: serde_json::Value,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    tracing::warn!(%err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn ready(message: &str) -> Response {
    Json(json!({ "message": message, "status": "ready" })).into_response()
}

async fn migrate_ready_handler() -> Response {
    ready("CRM migration endpoint")
}

async fn sync_ready_handler() -> Response {
    ready("CRM sync endpoint")
}

async fn deal_webhook_ready_handler() -> Response {
    ready("CRM deal webhook endpoint")
}

async fn contact_webhook_ready_handler() -> Response {
    ready("CRM contact webhook endpoint")
}

/// One-time bulk import. Always 200 with counts and per-kind errors once the
/// request itself validates; upstream failures never turn into a 5xx here.
async fn migrate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CrmTokenRequest>,
) -> Response {
    let Some(token) = body
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return bad_request("API key required");
    };
    let reader = match state.connector.reader(token) {
        Ok(reader) => reader,
        Err(err) => return server_error(err.into()),
    };
    let outcome = run_migration(reader.as_ref(), state.store.as_ref()).await;
    Json(json!({
        "success": true,
        "imported": outcome.counts,
        "errors": outcome.errors,
    }))
    .into_response()
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CrmTokenRequest>,
) -> Response {
    let Some(token) = body
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return bad_request("API key required");
    };
    let reader = match state.connector.reader(token) {
        Ok(reader) => reader,
        Err(err) => return server_error(err.into()),
    };
    let outcome = run_sync(reader.as_ref(), state.store.as_ref()).await;
    Json(json!({
        "success": true,
        "synced": outcome.counts,
        "errors": outcome.errors,
    }))
    .into_response()
}

/// Body is an array of CRM-native records with a nested `properties`
/// envelope, same shape as the listing API returns.
async fn deal_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Vec<RawDeal>>,
) -> Response {
    match ingest_deal_webhook(state.store.as_ref(), &payload).await {
        Ok(record) => Json(json!({
            "success": true,
            "message": "Deal synced from HubSpot",
            "data": record,
        }))
        .into_response(),
        Err(WebhookError::EmptyPayload) => bad_request("No deal data"),
        Err(WebhookError::Store(err)) => server_error(err.into()),
    }
}

async fn contact_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Vec<RawContact>>,
) -> Response {
    match ingest_contact_webhook(state.store.as_ref(), &payload).await {
        Ok(record) => Json(json!({
            "success": true,
            "message": "Partner synced from HubSpot",
            "data": record,
        }))
        .into_response(),
        Err(WebhookError::EmptyPayload) => bad_request("No contact data"),
        Err(WebhookError::Store(err)) => server_error(err.into()),
    }
}

async fn list_partners_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_partners().await {
        Ok(rows) => {
            let total = rows.len();
            Json(json!({ "results": rows, "total": total })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn create_partner_handler(
    State(state): State<Arc<AppState>>,
    Json(row): Json<Partner>,
) -> Response {
    match state.store.create_partner(row).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn delete_partner_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    let Some(id) = query.id else {
        return bad_request("ID required");
    };
    match state.store.delete_partner(id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// Highest-revenue partners; the store already sorts by revenue descending.
async fn top_partners_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Response {
    match state.store.list_partners().await {
        Ok(mut rows) => {
            rows.truncate(query.limit.unwrap_or(3));
            Json(json!({ "results": rows })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn list_deals_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_deals().await {
        Ok(rows) => {
            let total = rows.len();
            Json(json!({ "results": rows, "total": total })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn create_deal_handler(State(state): State<Arc<AppState>>, Json(row): Json<Deal>) -> Response {
    match state.store.create_deal(row).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn delete_deal_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    let Some(id) = query.id else {
        return bad_request("ID required");
    };
    match state.store.delete_deal(id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn list_leads_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_leads().await {
        Ok(rows) => {
            let total = rows.len();
            Json(json!({ "results": rows, "total": total })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

async fn create_lead_handler(State(state): State<Arc<AppState>>, Json(row): Json<Lead>) -> Response {
    match state.store.create_lead(row).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn delete_lead_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    let Some(id) = query.id else {
        return bad_request("ID required");
    };
    match state.store.delete_lead(id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// Bulk upsert of client-mapped rows, `{ "data": [...] }`, keyed by the
/// natural key of the kind.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(kind): AxumPath<String>,
    Json(body): Json<UploadRequest>,
) -> Response {
    let written = match kind.as_str() {
        "partners" => match serde_json::from_value::<Vec<Partner>>(body.data) {
            Ok(rows) => state.store.upsert_partners(&rows).await,
            Err(err) => return bad_request(&format!("invalid partner rows: {err}")),
        },
        "deals" => match serde_json::from_value::<Vec<Deal>>(body.data) {
            Ok(rows) => state.store.upsert_deals(&rows).await,
            Err(err) => return bad_request(&format!("invalid deal rows: {err}")),
        },
        "leads" => match serde_json::from_value::<Vec<Lead>>(body.data) {
            Ok(rows) => state.store.upsert_leads(&rows).await,
            Err(err) => return bad_request(&format!("invalid lead rows: {err}")),
        },
        _ => return bad_request("unknown upload kind"),
    };
    match written {
        Ok(count) => Json(json!({ "success": true, "count": count })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// Raw CRM CSV export in the request body; parsed with the same defaulting
/// contract as the JSON upload path, then upserted.
async fn import_csv_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(kind): AxumPath<String>,
    body: String,
) -> Response {
    let today = Utc::now().date_naive();
    let written = match kind.as_str() {
        "partners" => match parse_partners_csv(&body) {
            Ok(rows) => state.store.upsert_partners(&rows).await,
            Err(err) => return bad_request(&format!("invalid csv: {err}")),
        },
        "deals" => match parse_deals_csv(&body, today) {
            Ok(rows) => state.store.upsert_deals(&rows).await,
            Err(err) => return bad_request(&format!("invalid csv: {err}")),
        },
        "leads" => match parse_leads_csv(&body, today) {
            Ok(rows) => state.store.upsert_leads(&rows).await,
            Err(err) => return bad_request(&format!("invalid csv: {err}")),
        },
        _ => return bad_request("unknown import kind"),
    };
    match written {
        Ok(count) => Json(json!({ "success": true, "count": count })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn export_csv_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(kind): AxumPath<String>,
) -> Response {
    let text = match kind.as_str() {
        "partners" => match state.store.list_partners().await {
            Ok(rows) => {
                let rows: Vec<Partner> = rows.into_iter().map(|r| r.partner).collect();
                export_partners_csv(&rows)
            }
            Err(err) => return server_error(err.into()),
        },
        "deals" => match state.store.list_deals().await {
            Ok(rows) => {
                let rows: Vec<Deal> = rows.into_iter().map(|r| r.deal).collect();
                export_deals_csv(&rows)
            }
            Err(err) => return server_error(err.into()),
        },
        "leads" => match state.store.list_leads().await {
            Ok(rows) => {
                let rows: Vec<Lead> = rows.into_iter().map(|r| r.lead).collect();
                export_leads_csv(&rows)
            }
            Err(err) => return server_error(err.into()),
        },
        _ => return bad_request("unknown export kind"),
    };
    match text {
        Ok(csv) => (
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// Dashboard stats computed from the store. Growth percentages are static
/// placeholders carried over from the dashboard design.
async fn overview_handler(State(state): State<Arc<AppState>>) -> Response {
    let (partners, deals) = tokio::join!(state.store.list_partners(), state.store.list_deals());
    let (partners, deals) = match (partners, deals) {
        (Ok(partners), Ok(deals)) => (partners, deals),
        (Err(err), _) | (_, Err(err)) => return server_error(err.into()),
    };
    let pipeline_value: f64 = deals
        .iter()
        .filter(|r| r.deal.status == DealStatus::Pending)
        .map(|r| r.deal.value)
        .sum();
    let active_deals = deals
        .iter()
        .filter(|r| r.deal.status != DealStatus::Rejected)
        .count();
    Json(json!({
        "totalPartners": partners.len(),
        "pipelineValue": pipeline_value,
        "activeDeals": active_deals,
        "monthlyGrowth": { "partners": 12, "revenue": 28 },
    }))
    .into_response()
}

async fn notifications_handler() -> Response {
    Json(json!({
        "notifications": [
            {
                "id": 1,
                "title": "New partner application",
                "message": "A new partner has applied to the program",
                "read": false,
            },
            {
                "id": 2,
                "title": "Deal stage changed",
                "message": "A deal moved to the approved stage",
                "read": false,
            },
            {
                "id": 3,
                "title": "Sync completed",
                "message": "The latest CRM sync finished",
                "read": true,
            },
        ]
    }))
    .into_response()
}

async fn get_settings_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.settings.load().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn put_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<PortalSettings>,
) -> Response {
    match state.settings.save(&settings).await {
        Ok(()) => Json(settings).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn reset_settings_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.settings.reset().await {
        Ok(()) => Json(PortalSettings::default()).into_response(),
        Err(err) => server_error(err.into()),
    }
}
