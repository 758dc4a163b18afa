//! Public addresses of the migrated application and of the web IDE.

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::info;

use crate::api::v1::l2c::{L2c, ServiceType};
use crate::cluster::Cluster;
use crate::resources::was::was_resource_name;
use crate::resources::INGRESS_PLACEHOLDER_HOST;
use crate::util::errors::Result;

fn ingress_host(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()?
        .rules
        .as_ref()?
        .first()?
        .host
        .as_deref()
}

fn ingress_lb_ip(ingress: &Ingress) -> Option<String> {
    ingress
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .clone()
}

/// Hostname served by the Ingress `name`, assigning one the first time a load balancer address shows up.
///
/// The assigned host is `<name>.<namespace>.<lb-ip>.nip.io`. It is written once; afterwards
/// the stored rule is the source of truth. `None` while the address is still unknown.
pub async fn resolve_ingress_host<C: Cluster>(cluster: &C, namespace: &str, name: &str) -> Result<Option<String>> {
    let Some(mut ingress) = cluster.get::<Ingress>(namespace, name).await? else {
        return Ok(None);
    };

    match ingress_host(&ingress) {
        Some(host) if host != INGRESS_PLACEHOLDER_HOST => return Ok(Some(host.to_string())),
        _ => {}
    }

    let Some(ip) = ingress_lb_ip(&ingress) else {
        return Ok(None);
    };
    let host = format!("{name}.{namespace}.{ip}.nip.io");
    if let Some(rule) = ingress
        .spec
        .as_mut()
        .and_then(|s| s.rules.as_mut())
        .and_then(|r| r.first_mut())
    {
        rule.host = Some(host.clone());
    }
    cluster.replace(namespace, &ingress).await?;
    info!("Assigned host {} to Ingress {}/{}", host, namespace, name);
    Ok(Some(host))
}

fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// URL the migrated application is reachable at, per exposure mode. `None` until it is.
pub async fn was_url<C: Cluster>(cluster: &C, l2c: &L2c) -> Result<Option<String>> {
    let namespace = l2c.namespace_or_err()?;
    let name = was_resource_name(l2c);
    let Some(service) = cluster.get::<Service>(&namespace, &name).await? else {
        return Ok(None);
    };
    let port = l2c.spec.was.to.port;

    let url = match l2c.spec.was.to.service_type {
        ServiceType::Ingress => resolve_ingress_host(cluster, &namespace, &name)
            .await?
            .map(|host| format!("http://{host}")),
        ServiceType::LoadBalancer => service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|i| i.first())
            .and_then(|i| i.ip.clone())
            .map(|ip| format!("http://{ip}:{port}")),
        ServiceType::NodePort => {
            let node_port = service
                .spec
                .as_ref()
                .and_then(|s| s.ports.as_ref())
                .and_then(|p| p.first())
                .and_then(|p| p.node_port);
            match node_port {
                Some(node_port) => cluster
                    .list_nodes()
                    .await?
                    .iter()
                    .find_map(internal_ip)
                    .map(|ip| format!("http://{ip}:{node_port}")),
                None => None,
            }
        }
        ServiceType::ClusterIP => service
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None")
            .map(|ip| format!("http://{ip}:{port}")),
    };
    if url.is_none() {
        info!("Address of {} {}/{} not known yet", service.name_any(), namespace, name);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryCluster;
    use crate::resources::fixtures;
    use crate::resources::was::{create_was_ingress, create_was_service};
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, NodeAddress, NodeStatus, ServiceStatus,
    };
    use k8s_openapi::api::networking::v1::{IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus};
    use kube::api::ObjectMeta;

    fn with_lb_ip(mut ingress: Ingress, ip: &str) -> Ingress {
        ingress.status = Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(vec![IngressLoadBalancerIngress {
                    ip: Some(ip.into()),
                    ..Default::default()
                }]),
            }),
        });
        ingress
    }

    #[tokio::test]
    async fn host_is_assigned_once_from_the_load_balancer() {
        let cluster = MemoryCluster::new();
        let l2c = fixtures::l2c();
        cluster.insert(&create_was_ingress(&l2c).unwrap()).unwrap();

        assert_eq!(resolve_ingress_host(&cluster, "demo", "shop-was").await.unwrap(), None);

        let stored: Ingress = cluster.get("demo", "shop-was").await.unwrap().unwrap();
        cluster.insert(&with_lb_ip(stored, "10.0.0.7")).unwrap();

        let host = resolve_ingress_host(&cluster, "demo", "shop-was").await.unwrap();
        assert_eq!(host.as_deref(), Some("shop-was.demo.10.0.0.7.nip.io"));

        let stored: Ingress = cluster.get("demo", "shop-was").await.unwrap().unwrap();
        let version = stored.metadata.resource_version.clone();
        let again = resolve_ingress_host(&cluster, "demo", "shop-was").await.unwrap();
        assert_eq!(again, host);
        let stored: Ingress = cluster.get("demo", "shop-was").await.unwrap().unwrap();
        assert_eq!(stored.metadata.resource_version, version);
    }

    #[tokio::test]
    async fn load_balancer_url_uses_service_port() {
        let cluster = MemoryCluster::new();
        let mut l2c = fixtures::l2c();
        l2c.spec.was.to.service_type = ServiceType::LoadBalancer;
        let mut service = create_was_service(&l2c).unwrap();
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some("192.168.1.20".into()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        cluster.insert(&service).unwrap();

        assert_eq!(
            was_url(&cluster, &l2c).await.unwrap().as_deref(),
            Some("http://192.168.1.20:8080")
        );
    }

    #[tokio::test]
    async fn node_port_url_uses_a_node_internal_ip() {
        let cluster = MemoryCluster::new();
        let mut l2c = fixtures::l2c();
        l2c.spec.was.to.service_type = ServiceType::NodePort;
        let mut service = create_was_service(&l2c).unwrap();
        if let Some(ports) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
            ports[0].node_port = Some(31080);
        }
        cluster.insert(&service).unwrap();
        cluster
            .add_node(Node {
                metadata: ObjectMeta {
                    name: Some("worker-1".into()),
                    ..Default::default()
                },
                status: Some(NodeStatus {
                    addresses: Some(vec![
                        NodeAddress {
                            type_: "Hostname".into(),
                            address: "worker-1".into(),
                        },
                        NodeAddress {
                            type_: "InternalIP".into(),
                            address: "172.16.0.4".into(),
                        },
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            was_url(&cluster, &l2c).await.unwrap().as_deref(),
            Some("http://172.16.0.4:31080")
        );
    }

    #[tokio::test]
    async fn no_service_means_no_url() {
        let cluster = MemoryCluster::new();
        assert_eq!(was_url(&cluster, &fixtures::l2c()).await.unwrap(), None);
    }
}
