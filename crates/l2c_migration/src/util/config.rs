pub const DEFAULT_SONAR_RESOURCE_NAME: &str = "l2c-managed-sonarqube";

/// Runtime configuration shared by the controller, the SonarQube bootstrap and the HTTP surface.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator and its SonarQube instance run in.
    pub namespace: String,
    /// Service name other pods use to reach the operator.
    pub api_service_name: String,
    pub http_port: u16,
    pub webhook_port: u16,
    /// Name of the SonarQube Deployment, Service and PVC the operator manages.
    pub sonar_resource_name: String,
    pub sonar_image: String,
    pub sonar_storage_size: String,
    /// Overrides the in-cluster SonarQube URL when set.
    pub sonar_url: Option<String>,
    pub encrypt_key: String,
    pub builder_image_jeus: String,
    pub ide_image: String,
    pub tibero_image: String,
    pub storage_class_name: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "l2c-system".to_string(),
            api_service_name: "l2c-operator".to_string(),
            http_port: 8080,
            webhook_port: 34335,
            sonar_resource_name: DEFAULT_SONAR_RESOURCE_NAME.to_string(),
            sonar_image: "azssi/working:0.0.1".to_string(),
            sonar_storage_size: "1Gi".to_string(),
            sonar_url: None,
            encrypt_key: "l2c-operator".to_string(),
            builder_image_jeus: "tmaxcloudck/s2i-jeus:8".to_string(),
            ide_image: "codercom/code-server:3.4.1".to_string(),
            tibero_image: "tmaxcloudck/tibero:6".to_string(),
            storage_class_name: None,
        }
    }
}

impl OperatorConfig {
    pub fn sonar_url(&self) -> String {
        match &self.sonar_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}.{}:9000", self.sonar_resource_name, self.namespace),
        }
    }

    /// Callback registered as the global SonarQube webhook.
    pub fn webhook_url(&self) -> String {
        format!("http://{}:{}/webhook", self.api_service_name, self.webhook_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_urls() {
        let mut config = OperatorConfig::default();
        assert_eq!(config.sonar_url(), "http://l2c-managed-sonarqube.l2c-system:9000");
        assert_eq!(config.webhook_url(), "http://l2c-operator:34335/webhook");

        config.sonar_url = Some("https://sonar.example.com/".to_string());
        assert_eq!(config.sonar_url(), "https://sonar.example.com");
    }
}
