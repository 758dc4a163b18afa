use std::sync::Arc;
use std::time::Duration;

use actix_web::web::Data;
use clap::Parser;
use kube::Client;
use tracing::info;

use l2c_migration::bridge::{exec::KubeExecutor, WebhookBridge};
use l2c_migration::cluster::KubeCluster;
use l2c_migration::controllers::l2c_controller::{self, State};
use l2c_migration::quality::credentials::{rotate_default_credentials, SonarCredentials};
use l2c_migration::quality::{provision, QualityOrchestrator, SonarClient};
use l2c_migration::util::config::{OperatorConfig, DEFAULT_SONAR_RESOURCE_NAME};
use l2c_migration::util::telemetry;

mod handlers;
mod server;
mod services;

use services::run_service::{KubeAuthorizer, RunService};
use services::webhook_service::WebhookService;

const SONAR_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "l2c-operator", about = "Drives legacy-to-cloud migration projects")]
struct Args {
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "l2c-system")]
    namespace: String,

    #[arg(long, env = "OPERATOR_SERVICE_NAME", default_value = "l2c-operator")]
    api_service_name: String,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 34335)]
    webhook_port: u16,

    #[arg(long, env = "SONAR_RESOURCE_NAME", default_value = DEFAULT_SONAR_RESOURCE_NAME)]
    sonar_resource_name: String,

    #[arg(long, env = "SONAR_IMAGE", default_value = "azssi/working:0.0.1")]
    sonar_image: String,

    #[arg(long, env = "SONAR_STORAGE_SIZE", default_value = "1Gi")]
    sonar_storage_size: String,

    /// Talk to SonarQube at this URL instead of the in-cluster service.
    #[arg(long, env = "SONAR_URL")]
    sonar_url: Option<String>,

    #[arg(long, env = "ENCRYPT_KEY", default_value = "l2c-operator")]
    encrypt_key: String,

    #[arg(long, env = "BUILDER_IMAGE_JEUS", default_value = "tmaxcloudck/s2i-jeus:8")]
    builder_image_jeus: String,

    #[arg(long, env = "IDE_IMAGE", default_value = "codercom/code-server:3.4.1")]
    ide_image: String,

    #[arg(long, env = "TIBERO_IMAGE", default_value = "tmaxcloudck/tibero:6")]
    tibero_image: String,

    #[arg(long, env = "STORAGE_CLASS_NAME")]
    storage_class_name: Option<String>,

    /// Log one JSON object per line.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    log_json: bool,
}

impl From<Args> for OperatorConfig {
    fn from(args: Args) -> Self {
        OperatorConfig {
            namespace: args.namespace,
            api_service_name: args.api_service_name,
            http_port: args.http_port,
            webhook_port: args.webhook_port,
            sonar_resource_name: args.sonar_resource_name,
            sonar_image: args.sonar_image,
            sonar_storage_size: args.sonar_storage_size,
            sonar_url: args.sonar_url,
            encrypt_key: args.encrypt_key,
            builder_image_jeus: args.builder_image_jeus,
            ide_image: args.ide_image,
            tibero_image: args.tibero_image,
            storage_class_name: args.storage_class_name,
        }
    }
}

/// Starts the managed SonarQube unless an external one is configured, then moves it off
/// its factory accounts and installs the gate, webhook and empty profiles.
async fn prepare_sonar(
    cluster: &KubeCluster,
    orchestrator: &QualityOrchestrator<SonarClient>,
    config: &OperatorConfig,
) -> anyhow::Result<()> {
    if config.sonar_url.is_none() {
        provision::deploy(cluster, config).await?;
        provision::wait_until_available(cluster, config, SONAR_POLL_INTERVAL).await?;
    } else {
        info!("Using external SonarQube at {}", config.sonar_url());
    }
    rotate_default_credentials(cluster, orchestrator.api(), &config.namespace, &config.sonar_resource_name).await?;
    orchestrator.bootstrap(&config.webhook_url()).await?;
    info!("SonarQube at {} is configured", config.sonar_url());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_json).await;
    let config = Arc::new(OperatorConfig::from(args));

    let client = Client::try_default().await?;
    let cluster = KubeCluster::new(client.clone());

    let orchestrator = Arc::new(QualityOrchestrator::new(SonarClient::new(
        &config.sonar_url(),
        SonarCredentials::default().admin_auth(),
    )));
    prepare_sonar(&cluster, &orchestrator, &config).await?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let ctx = state.to_context(client.clone(), config.clone(), orchestrator)?;

    let webhook_service = Data::new(WebhookService::new(
        WebhookBridge::new(cluster.clone(), KubeExecutor::new(client.clone())),
        ctx.metrics.clone(),
    ));
    let run_service = Data::new(RunService::new(
        cluster,
        KubeAuthorizer::new(client),
        config.clone(),
    ));

    let controller = l2c_controller::run(ctx);
    let api_server = server::start_server(state, run_service, webhook_service.clone(), config.http_port);
    let webhook_server = server::start_webhook_server(webhook_service, config.webhook_port);

    // The controller and both servers shut down gracefully on signal, so poll until all are done
    let (controller, api_server, webhook_server) = tokio::join!(controller, api_server, webhook_server);
    controller?;
    api_server?;
    webhook_server?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_library_config() {
        let args = Args::parse_from(["operator"]);
        assert!(!args.log_json);
        let config = OperatorConfig::from(args);
        let defaults = OperatorConfig::default();
        assert_eq!(config.namespace, defaults.namespace);
        assert_eq!(config.webhook_url(), defaults.webhook_url());
        assert_eq!(config.sonar_url(), defaults.sonar_url());
        assert_eq!(config.ide_image, defaults.ide_image);
        assert_eq!(config.sonar_resource_name, "l2c-managed-sonarqube");
        assert_eq!(config.sonar_image, defaults.sonar_image);
        assert_eq!(config.sonar_storage_size, defaults.sonar_storage_size);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from(["operator", "--namespace", "migrate", "--sonar-url", "http://sonar:9000/"]);
        let config = OperatorConfig::from(args);
        assert_eq!(config.namespace, "migrate");
        assert_eq!(config.sonar_url(), "http://sonar:9000");
    }
}
