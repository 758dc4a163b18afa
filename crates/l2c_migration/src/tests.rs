#[cfg(test)]
mod tests {
    use crate::api::v1::l2c::*;
    use crate::cluster::KubeCluster;
    use crate::controllers::driver::Driver;
    use crate::quality::{memory::FakeSonar, QualityOrchestrator};
    use crate::util::conditions::{is_status_condition_true, ProjectCondition};
    use crate::util::config::OperatorConfig;
    use k8s_openapi::api::core::v1::ServiceAccount;
    use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
    use kube::Client;
    use serial_test::serial;
    use std::sync::Arc;

    fn test_l2c(name: &str) -> L2c {
        L2c {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: L2cSpec {
                was: L2cWas {
                    from: L2cWasFrom {
                        type_: "weblogic".to_string(),
                        git: L2cGit {
                            url: "https://github.com/tmax-cloud/l2c-sample.git".to_string(),
                            revision: None,
                        },
                    },
                    to: L2cWasTo {
                        type_: "jeus".to_string(),
                        image: L2cImage {
                            url: "registry.local/l2c-sample".to_string(),
                            reg_secret: None,
                        },
                        port: 8080,
                        service_type: ServiceType::ClusterIP,
                    },
                },
                db: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore = "uses k8s current-context"]
    async fn integration_reconcile_should_set_ready() {
        let client = Client::try_default().await.unwrap();
        let l2cs: Api<L2c> = Api::namespaced(client.clone(), "default");
        let ssapply = PatchParams::apply("ctrltest").force();
        l2cs.patch("test-l2c", &ssapply, &Patch::Apply(&test_l2c("test-l2c")))
            .await
            .unwrap();

        let driver = Driver::new(
            KubeCluster::new(client.clone()),
            Arc::new(QualityOrchestrator::new(FakeSonar::new())),
            Arc::new(OperatorConfig::default()),
        );
        let stored = l2cs.get("test-l2c").await.unwrap();
        driver.apply(&stored).await.unwrap();

        let output = l2cs.get("test-l2c").await.unwrap();
        let status = output.status.unwrap();
        assert!(is_status_condition_true(&status.conditions, ProjectCondition::Ready));
        assert_eq!(status.pipeline_name.as_deref(), Some("test-l2c"));

        let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), "default");
        let sa = accounts.get("test-l2c").await.unwrap();
        assert_eq!(sa.metadata.owner_references.unwrap()[0].name, "test-l2c");

        l2cs.delete("test-l2c", &DeleteParams::default()).await.unwrap();
    }
}
