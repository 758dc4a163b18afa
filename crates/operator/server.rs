use actix_web::{middleware, web, web::Data, App, HttpServer};
use anyhow::Result;
use l2c_migration::bridge::exec::KubeExecutor;
use l2c_migration::cluster::KubeCluster;
use l2c_migration::controllers::l2c_controller::State;

use crate::handlers::{health, metrics, run, webhook};
use crate::services::run_service::{KubeAuthorizer, RunService};
use crate::services::webhook_service::WebhookService;

pub type LiveWebhookService = WebhookService<KubeCluster, KubeExecutor>;
pub type LiveRunService = RunService<KubeCluster, KubeAuthorizer>;

/// Serve diagnostics, metrics, the run subresource and the webhook on `port`
pub async fn start_server(
    state: State,
    run_service: Data<LiveRunService>,
    webhook_service: Data<LiveWebhookService>,
    port: u16,
) -> Result<()> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .app_data(run_service.clone())
            .app_data(webhook_service.clone())
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health::index)
            .service(health::health)
            .service(metrics::metrics)
            .route(
                run::RUN_PATH,
                web::put().to(run::run::<KubeCluster, KubeAuthorizer>),
            )
            .route(
                "/webhook",
                web::post().to(webhook::webhook::<KubeCluster, KubeExecutor>),
            )
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(5);

    server.run().await?;
    Ok(())
}

/// Serve the SonarQube callback on its own port
pub async fn start_webhook_server(service: Data<LiveWebhookService>, port: u16) -> Result<()> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .wrap(middleware::Logger::default())
            .route(
                "/webhook",
                web::post().to(webhook::webhook::<KubeCluster, KubeExecutor>),
            )
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(5);

    server.run().await?;
    Ok(())
}
