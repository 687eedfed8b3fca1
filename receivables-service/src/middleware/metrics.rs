use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::services::metrics::{ERRORS_TOTAL, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION};

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status_code = response.status();
    let status = status_code.as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(duration.as_secs_f64());

    if status_code.is_client_error() || status_code.is_server_error() {
        let error_type = match status_code.as_u16() {
            400 => "validation_error",
            404 => "not_found",
            409 => "conflict",
            422 => "invalid_state",
            500..=599 => "internal_error",
            _ => "client_error",
        };
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();
    }

    response
}
