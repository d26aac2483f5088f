use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use harvd_state::CommandOutcome;
use serde_json::{json, Value};

/// `{"status":"OK","message":...}`
pub fn ok_message(message: impl Into<String>) -> Value {
    json!({ "status": "OK", "message": message.into() })
}

/// `{"status":"OK","value":...}`
pub fn ok_value(value: Value) -> Value {
    json!({ "status": "OK", "value": value })
}

/// `{"status":"FAILED","message":...}`
pub fn failed(message: impl Into<String>) -> Value {
    json!({ "status": "FAILED", "message": message.into() })
}

/// Map a state-machine command outcome onto the wire: 202 for accepted
/// work, 200 for synchronous completion, 503 (+`Retry-After` when
/// known) for busy, 400 for rejected.
pub fn outcome_response(outcome: CommandOutcome) -> Response {
    match outcome {
        CommandOutcome::Accepted { message, retry_after } => {
            with_retry_after(StatusCode::ACCEPTED, ok_message(message), retry_after)
        }
        CommandOutcome::Ok(message) => {
            (StatusCode::OK, Json(ok_message(message))).into_response()
        }
        CommandOutcome::Busy { message, retry_after } => {
            with_retry_after(StatusCode::SERVICE_UNAVAILABLE, failed(message), retry_after)
        }
        CommandOutcome::Rejected(message) => {
            (StatusCode::BAD_REQUEST, Json(failed(message))).into_response()
        }
    }
}

fn with_retry_after(status: StatusCode, body: Value, retry_after: Option<u64>) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
