//! Liveness and readiness endpoints.

use crate::state::HealthProbes;
use axum::{Json, extract::State, http::StatusCode};
use courier_runtime::HealthReport;
use serde_json::{Value, json};

/// Liveness probe. Does not look at dependencies.
///
/// ```text
/// GET /health -> 200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness probe over the configured dependencies.
///
/// Returns 200 while nothing is unhealthy and 503 otherwise.
///
/// ```json
/// {
///   "status": "degraded",
///   "checks": [
///     {"component": "database", "status": "healthy", "message": null},
///     {"component": "broker", "status": "degraded", "message": "reconnecting"}
///   ]
/// }
/// ```
pub async fn readiness(State(probes): State<HealthProbes>) -> (StatusCode, Json<Value>) {
    let report = HealthReport::new(probes.run().await);

    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let checks: Vec<Value> = report
        .checks
        .iter()
        .map(|check| {
            json!({
                "component": check.component,
                "status": check.status.as_str(),
                "message": check.message,
            })
        })
        .collect();

    (
        status,
        Json(json!({ "status": report.status.as_str(), "checks": checks })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HealthProbe;
    use async_trait::async_trait;
    use courier_runtime::HealthCheck;
    use std::sync::Arc;

    struct Fixed(HealthCheck);

    #[async_trait]
    impl HealthProbe for Fixed {
        async fn check(&self) -> HealthCheck {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn ready_without_probes() {
        let (status, Json(body)) = readiness(State(HealthProbes::default())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn degraded_is_still_ready() {
        let probes = HealthProbes::new(vec![
            Arc::new(Fixed(HealthCheck::healthy("database"))),
            Arc::new(Fixed(HealthCheck::degraded("broker", "reconnecting"))),
        ]);
        let (status, Json(body)) = readiness(State(probes)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"][1]["message"], "reconnecting");
    }

    #[tokio::test]
    async fn unhealthy_is_not_ready() {
        let probes = HealthProbes::new(vec![Arc::new(Fixed(HealthCheck::unhealthy(
            "database",
            "connection refused",
        )))]);
        let (status, Json(body)) = readiness(State(probes)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }
}
