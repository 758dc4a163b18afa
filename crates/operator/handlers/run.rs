use actix_web::{web::Data, web::Path, HttpRequest, HttpResponse};
use l2c_migration::cluster::Cluster;
use l2c_migration::util::errors::Error;
use serde_json::json;

use crate::services::run_service::{Authorizer, Caller, RunService};

pub const RUN_PATH: &str = "/apis/tmax.io/v1/namespaces/{namespace}/l2cs/{name}/run";

const HEADER_USER: &str = "X-Remote-User";
const HEADER_GROUP: &str = "X-Remote-Group";

fn caller(req: &HttpRequest) -> Caller {
    let headers = req.headers();
    Caller {
        user: headers
            .get(HEADER_USER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        groups: headers
            .get_all(HEADER_GROUP)
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
    }
}

/// `PUT .../l2cs/{name}/run`: starts the project's pipeline.
pub async fn run<C, A>(
    service: Data<RunService<C, A>>,
    path: Path<(String, String)>,
    req: HttpRequest,
) -> Result<HttpResponse, Error>
where
    C: Cluster + 'static,
    A: Authorizer + 'static,
{
    let (namespace, name) = path.into_inner();
    let response = service.run(&caller(&req), &namespace, &name).await?;
    let body = json!({ "message": response.message });
    if response.accepted_only {
        Ok(HttpResponse::Accepted().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App};
    use async_trait::async_trait;
    use l2c_migration::api::v1::l2c::L2c;
    use l2c_migration::cluster::memory::MemoryCluster;
    use l2c_migration::util::config::OperatorConfig;
    use l2c_migration::util::errors::Result;
    use std::sync::Arc;

    struct AllowOnly(&'static str);

    #[async_trait]
    impl Authorizer for AllowOnly {
        async fn may_run(&self, user: &str, _: &[String], _: &str, _: &str) -> Result<bool> {
            Ok(user == self.0)
        }
    }

    fn project() -> L2c {
        serde_json::from_value(json!({
            "apiVersion": "tmax.io/v1",
            "kind": "L2c",
            "metadata": { "name": "shop", "namespace": "demo", "uid": "uid-shop" },
            "spec": {
                "was": {
                    "from": { "type": "weblogic", "git": { "url": "https://git.example.com/shop.git" } },
                    "to": { "type": "jeus", "image": { "url": "registry.example.com/shop" }, "port": 8080 }
                }
            }
        }))
        .unwrap()
    }

    async fn call(cluster: MemoryCluster, user: Option<&str>, name: &str) -> StatusCode {
        let service = Data::new(RunService::new(
            cluster,
            AllowOnly("alice"),
            Arc::new(OperatorConfig::default()),
        ));
        let app = test::init_service(
            App::new()
                .app_data(service)
                .route(RUN_PATH, web::put().to(run::<MemoryCluster, AllowOnly>)),
        )
        .await;
        let mut req = test::TestRequest::put().uri(&format!("/apis/tmax.io/v1/namespaces/demo/l2cs/{name}/run"));
        if let Some(user) = user {
            req = req.insert_header((HEADER_USER, user));
        }
        test::call_service(&app, req.to_request()).await.status()
    }

    #[actix_web::test]
    async fn missing_or_denied_user_is_unauthorized() {
        let cluster = MemoryCluster::new();
        cluster.insert(&project()).unwrap();
        assert_eq!(call(cluster.clone(), None, "shop").await, StatusCode::UNAUTHORIZED);
        assert_eq!(call(cluster, Some("mallory"), "shop").await, StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn unknown_project_is_not_found() {
        assert_eq!(call(MemoryCluster::new(), Some("alice"), "ghost").await, StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn project_that_is_not_ready_is_only_accepted() {
        let cluster = MemoryCluster::new();
        cluster.insert(&project()).unwrap();
        assert_eq!(call(cluster.clone(), Some("alice"), "shop").await, StatusCode::ACCEPTED);
        assert!(cluster.creates().is_empty());
    }
}
