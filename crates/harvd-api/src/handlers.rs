use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use harvd_config::ParameterValue;
use harvd_domain::{EtlHealth, StateTag};
use harvd_etl::Etl;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::reply::{failed, ok_message, ok_value, outcome_response};
use crate::state::AppState;

// ── Harvest commands ──────────────────────────────────────────────────────────

pub async fn post_harvest(State(state): State<AppState>) -> Response {
    outcome_response(state.ctx().start_harvest())
}

pub async fn post_abort(State(state): State<AppState>) -> Response {
    outcome_response(state.ctx().abort())
}

pub async fn post_submit(State(state): State<AppState>) -> Response {
    outcome_response(state.ctx().submit())
}

pub async fn post_save(State(state): State<AppState>) -> Response {
    outcome_response(state.ctx().save())
}

pub async fn post_reset(State(state): State<AppState>) -> Response {
    outcome_response(state.ctx().reset())
}

// ── Info & status ─────────────────────────────────────────────────────────────

fn version_line(ctx: &harvd_runtime::ServiceContext) -> String {
    ctx.bus()
        .query(&harvd_events::Query::VersionInfo)
        .and_then(harvd_events::Answer::into_version_info)
        .unwrap_or_else(|| ctx.module_name().to_string())
}

/// Plain-text service overview.
pub async fn get_harvest(State(state): State<AppState>) -> String {
    let ctx = state.ctx();
    let machine = ctx.machine();
    let manager = ctx.manager();

    let mut out = format!("{}\n", version_line(&ctx));
    out.push_str(&format!("state: {}\n", machine.current_tag()));
    out.push_str(&format!("status: {}\n", machine.status_string()));
    let progress = machine.progress_string();
    if !progress.is_empty() {
        out.push_str(&format!("progress: {}\n", progress));
    }
    out.push_str(&format!("harvested documents: {}\n", manager.total_harvested()));
    out.push_str(&format!("health: {}\n", manager.health()));
    out.push_str(&format!(
        "source checksum: {}\n",
        manager.harvester_hash().as_deref().unwrap_or("unknown")
    ));
    out.push_str(&format!("outdated: {}\n", manager.is_outdated()));
    out.push_str(&format!("{}\n", ctx.time_keeper().describe()));
    let schedules = ctx.scheduler().get_all();
    if schedules.is_empty() {
        out.push_str("schedules: none\n");
    } else {
        out.push_str(&format!("schedules: {}\n", schedules.join(", ")));
        if let Some(next) = ctx.scheduler().next_fire() {
            out.push_str(&format!("next scheduled harvest: {}\n", next.to_rfc3339()));
        }
    }

    out.push_str("pipelines:\n");
    for etl in manager.pipelines() {
        let bound = match etl.max_documents() {
            -1 => "?".to_string(),
            n => n.to_string(),
        };
        out.push_str(&format!(
            "- {}: {}, health {}, {}/{} documents{}\n",
            etl.name(),
            etl.status(),
            etl.health(),
            etl.harvested_count(),
            bound,
            if etl.is_enabled() { "" } else { " (disabled)" },
        ));
    }
    out
}

/// JSON snapshots of every registered pipeline.
pub async fn get_etls(State(state): State<AppState>) -> Json<Value> {
    let snapshots: Vec<Value> = state
        .ctx()
        .manager()
        .pipelines()
        .iter()
        .map(|etl| json!(etl.snapshot()))
        .collect();
    Json(ok_value(json!(snapshots)))
}

/// Recent bus events, oldest first.
pub async fn get_events(State(state): State<AppState>) -> Json<Value> {
    Json(ok_value(json!(state.ctx().event_log().recent())))
}

/// 200 `OK`, or 500 with the worst health tag as the body.
pub async fn get_health(State(state): State<AppState>) -> Response {
    let ctx = state.ctx();
    let mut health = ctx.manager().health();
    if ctx.machine().current_tag() == StateTag::Error {
        health = health.worst(EtlHealth::InitializationFailed);
    }
    if health.is_ok() {
        (StatusCode::OK, "OK".to_string()).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, health.to_string()).into_response()
    }
}

pub async fn get_state(State(state): State<AppState>) -> String {
    state.ctx().machine().current_tag().to_string()
}

pub async fn get_progress(State(state): State<AppState>) -> String {
    state.ctx().machine().progress_string()
}

pub async fn get_version(State(state): State<AppState>) -> String {
    version_line(&state.ctx())
}

/// Tail of the module log file; 404 when logging goes to stdout.
pub async fn get_log(State(state): State<AppState>) -> Result<String, ApiError> {
    const TAIL_BYTES: u64 = 65_536;

    let ctx = state.ctx();
    let Some(path) = ctx.log_path() else {
        return Err(ApiError::not_found("the service logs to stdout"));
    };
    let content = std::fs::read(path)
        .map_err(|e| ApiError::internal(format!("cannot read {}: {}", path.display(), e)))?;
    let skip = content.len().saturating_sub(TAIL_BYTES as usize);
    Ok(String::from_utf8_lossy(&content[skip..]).into_owned())
}

// ── Configuration ─────────────────────────────────────────────────────────────

fn typed_value(value: &ParameterValue) -> Value {
    match value {
        ParameterValue::Integer(i) => json!(i),
        ParameterValue::Boolean(b) => json!(b),
        other => json!(other.as_raw()),
    }
}

/// Listing of all registered parameters: JSON by default, the masked
/// human-readable rendering for `Accept: text/plain`.
pub async fn get_config(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = state.ctx();
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if accept.contains("text/plain") {
        return ctx.config().as_plain_text().into_response();
    }

    let entries: Vec<Value> = ctx
        .config()
        .parameters()
        .into_iter()
        .filter(|p| p.is_registered())
        .map(|p| {
            json!({
                "key": p.key(),
                "category": p.category().name,
                "type": p.value().type_name(),
                "value": typed_value(p.value()),
                "registered": true,
            })
        })
        .collect();
    Json(ok_value(json!(entries))).into_response()
}

/// Set parameters from a `{"<category>/<key>": "<raw value>"}` map.
/// All-or-nothing is not attempted; the first rejection aborts with
/// 400 and earlier assignments stand.
pub async fn put_config(
    State(state): State<AppState>,
    Json(body): Json<BTreeMap<String, String>>,
) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(failed("no parameters given"))).into_response();
    }
    let ctx = state.ctx();
    for (composite_key, raw) in &body {
        if let Err(e) = ctx.config().set_parameter(composite_key, raw) {
            return (StatusCode::BAD_REQUEST, Json(failed(e.to_string()))).into_response();
        }
    }
    (
        StatusCode::OK,
        Json(ok_message(format!("{} parameter(s) updated", body.len()))),
    )
        .into_response()
}

// ── Schedules ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub cron: Option<String>,
}

pub async fn get_schedule(State(state): State<AppState>) -> Json<Value> {
    Json(ok_value(json!({ "crons": state.ctx().scheduler().get_all() })))
}

pub async fn post_schedule(
    State(state): State<AppState>,
    Json(body): Json<ScheduleBody>,
) -> Response {
    let Some(cron) = body.cron else {
        return (StatusCode::BAD_REQUEST, Json(failed("missing 'cron' field"))).into_response();
    };
    match state.ctx().scheduler().add(&cron) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(ok_message(format!("schedule '{}' added", cron))),
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(failed(e.to_string()))).into_response(),
    }
}

/// Delete one entry; with no body, an empty expression or `"all"`,
/// delete everything (succeeds on an empty set).
pub async fn delete_schedule(
    State(state): State<AppState>,
    body: Option<Json<ScheduleBody>>,
) -> Response {
    let scheduler = state.ctx().scheduler().clone();
    let cron = body.and_then(|Json(b)| b.cron).unwrap_or_default();
    if cron.is_empty() || cron.eq_ignore_ascii_case("all") {
        return match scheduler.delete_all() {
            Ok(()) => (StatusCode::OK, Json(ok_message("all schedules removed"))).into_response(),
            Err(e) => ApiError::internal(e.to_string()).into_response(),
        };
    }
    match scheduler.delete(&cron) {
        Ok(()) => (
            StatusCode::OK,
            Json(ok_message(format!("schedule '{}' removed", cron))),
        )
            .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(failed(e.to_string()))).into_response(),
    }
}
