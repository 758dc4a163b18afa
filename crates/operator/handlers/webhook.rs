use actix_web::{web::Bytes, web::Data, HttpResponse};
use l2c_migration::bridge::exec::PodExecutor;
use l2c_migration::bridge::QualityGateEvent;
use l2c_migration::cluster::Cluster;
use l2c_migration::util::errors::{Error, StdError};
use serde_json::json;

use crate::services::webhook_service::WebhookService;

/// `POST /webhook`: SonarQube quality gate callback.
pub async fn webhook<C, E>(service: Data<WebhookService<C, E>>, body: Bytes) -> Result<HttpResponse, Error>
where
    C: Cluster + 'static,
    E: PodExecutor + 'static,
{
    let event: QualityGateEvent =
        serde_json::from_slice(&body).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))?;
    let verdict = service.deliver(&event).await?;
    Ok(HttpResponse::Ok().json(json!({ "result": verdict.as_str() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App};
    use l2c_migration::bridge::recording::RecordingExecutor;
    use l2c_migration::bridge::WebhookBridge;
    use l2c_migration::cluster::memory::MemoryCluster;
    use l2c_migration::util::metrics::Metrics;

    fn service(metrics: Metrics) -> Data<WebhookService<MemoryCluster, RecordingExecutor>> {
        Data::new(WebhookService::new(
            WebhookBridge::new(MemoryCluster::new(), RecordingExecutor::new()),
            metrics,
        ))
    }

    #[actix_web::test]
    async fn status_codes_follow_the_error_taxonomy() {
        let metrics = Metrics::default();
        let app = test::init_service(
            App::new()
                .app_data(service(metrics.clone()))
                .route("/webhook", web::post().to(webhook::<MemoryCluster, RecordingExecutor>)),
        )
        .await;

        let cases = [
            ("not json".to_string(), StatusCode::BAD_REQUEST),
            (
                r#"{"project":{"key":"noUnderscore"},"qualityGate":{"status":"OK"}}"#.to_string(),
                StatusCode::BAD_REQUEST,
            ),
            (
                r#"{"project":{"key":"demo_shop"},"qualityGate":{"status":"OK"}}"#.to_string(),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (body, expected) in cases {
            let req = test::TestRequest::post()
                .uri("/webhook")
                .insert_header(("content-type", "application/json"))
                .set_payload(body.clone())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), expected, "body {body}");
        }

        assert_eq!(metrics.webhook_signals.with_label_values(&["rejected"]).get(), 1);
        assert_eq!(metrics.webhook_signals.with_label_values(&["failed"]).get(), 1);
    }
}
