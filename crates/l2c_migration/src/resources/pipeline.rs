//! The fixed analyze, migrate, build and deploy pipeline and its runs.

use kube::ResourceExt;

use super::db::{db_port, db_resource_name};
use super::metadata;
use super::was::{builder_image, was_resource_name};
use crate::api::tekton::{
    Param, ParamSpec, Pipeline, PipelineDeclaredResource, PipelineRef, PipelineResourceBinding,
    PipelineResourceSpec, PipelineRun, PipelineRunSpec, PipelineSpec, PipelineTask, PipelineTaskResource,
    PipelineTaskResources, TaskRef,
};
use crate::api::v1::l2c::L2c;
use crate::util::conditions::Phase;
use crate::util::config::OperatorConfig;
use crate::util::errors::Result;

pub const RESOURCE_GIT: &str = "git-source";
pub const RESOURCE_IMAGE: &str = "image";

pub const PARAM_SONAR_URL: &str = "sonar-url";
pub const PARAM_SONAR_TOKEN: &str = "sonar-token";
pub const PARAM_SONAR_PROJECT: &str = "sonar-project-id";

const TASK_ANALYZE_MAVEN: &str = "l2c-sonar-scan-java-maven";
const TASK_DB_MIGRATION: &str = "l2c-db-migration";
const TASK_BUILD: &str = "l2c-build";
const TASK_DEPLOY: &str = "l2c-deploy";

fn cluster_task(name: &str) -> TaskRef {
    TaskRef {
        name: name.to_string(),
        kind: "ClusterTask".to_string(),
    }
}

fn resource(name: &str, resource: &str) -> PipelineTaskResource {
    PipelineTaskResource {
        name: name.to_string(),
        resource: resource.to_string(),
    }
}

fn pipeline_param(name: &str) -> Param {
    Param::new(name, format!("$(params.{name})"))
}

fn migrate_params(l2c: &L2c) -> Result<Vec<Param>> {
    let mut params = vec![
        Param::new("CM_NAME", db_resource_name(l2c)),
        Param::new("SECRET_NAME", l2c.name_any()),
    ];
    match &l2c.spec.db {
        Some(db) => {
            params.insert(0, Param::new("DO_MIGRATE_DB", "TRUE"));
            params.extend([
                Param::new("SOURCE_TYPE", db.from.type_.to_uppercase()),
                Param::new("SOURCE_HOST", db.from.host.clone()),
                Param::new("SOURCE_PORT", db.from.port.to_string()),
                Param::new("TARGET_TYPE", db.to.type_.to_uppercase()),
                Param::new("TARGET_HOST", db_resource_name(l2c)),
                Param::new("TARGET_PORT", db_port(l2c)?.to_string()),
            ]);
        }
        None => {
            params.insert(0, Param::new("DO_MIGRATE_DB", "FALSE"));
            params.extend([
                Param::new("SOURCE_TYPE", ""),
                Param::new("SOURCE_HOST", ""),
                Param::new("SOURCE_PORT", "0"),
                Param::new("TARGET_TYPE", ""),
                Param::new("TARGET_HOST", db_resource_name(l2c)),
                Param::new("TARGET_PORT", "0"),
            ]);
        }
    }
    Ok(params)
}

pub fn create_pipeline(l2c: &L2c, config: &OperatorConfig) -> Result<Pipeline> {
    let tasks = vec![
        PipelineTask {
            name: Phase::Analyze.task_name().to_string(),
            task_ref: cluster_task(TASK_ANALYZE_MAVEN),
            run_after: vec![],
            resources: Some(PipelineTaskResources {
                inputs: vec![resource(RESOURCE_GIT, RESOURCE_GIT)],
                outputs: vec![],
            }),
            params: vec![
                pipeline_param(PARAM_SONAR_URL),
                pipeline_param(PARAM_SONAR_TOKEN),
                pipeline_param(PARAM_SONAR_PROJECT),
            ],
        },
        PipelineTask {
            name: Phase::DBMigrate.task_name().to_string(),
            task_ref: cluster_task(TASK_DB_MIGRATION),
            run_after: vec![Phase::Analyze.task_name().to_string()],
            resources: None,
            params: migrate_params(l2c)?,
        },
        PipelineTask {
            name: Phase::Build.task_name().to_string(),
            task_ref: cluster_task(TASK_BUILD),
            run_after: vec![Phase::DBMigrate.task_name().to_string()],
            resources: Some(PipelineTaskResources {
                inputs: vec![resource("source", RESOURCE_GIT)],
                outputs: vec![resource("image", RESOURCE_IMAGE)],
            }),
            params: vec![
                Param::new("BUILDER_IMAGE", builder_image(l2c, config)?),
                Param::new(
                    "REGISTRY_SECRET_NAME",
                    l2c.spec.was.to.image.reg_secret.clone().unwrap_or_default(),
                ),
            ],
        },
        PipelineTask {
            name: Phase::Deploy.task_name().to_string(),
            task_ref: cluster_task(TASK_DEPLOY),
            run_after: vec![Phase::Build.task_name().to_string()],
            resources: Some(PipelineTaskResources {
                inputs: vec![resource("image", RESOURCE_IMAGE)],
                outputs: vec![],
            }),
            params: vec![
                Param::new("app-name", l2c.name_any()),
                Param::new(
                    "image-url",
                    format!("$(tasks.{}.results.image-url)", Phase::Build.task_name()),
                ),
                Param::new("deploy-cfg-name", was_resource_name(l2c)),
            ],
        },
    ];

    let string_param = |name: &str| ParamSpec {
        name: name.to_string(),
        type_: "string".to_string(),
        description: None,
    };

    Ok(Pipeline {
        metadata: metadata(l2c, l2c.name_any(), "l2c")?,
        spec: PipelineSpec {
            resources: vec![
                PipelineDeclaredResource {
                    name: RESOURCE_GIT.to_string(),
                    type_: "git".to_string(),
                },
                PipelineDeclaredResource {
                    name: RESOURCE_IMAGE.to_string(),
                    type_: "image".to_string(),
                },
            ],
            params: vec![
                string_param(PARAM_SONAR_URL),
                string_param(PARAM_SONAR_TOKEN),
                string_param(PARAM_SONAR_PROJECT),
            ],
            tasks,
        },
    })
}

/// A run of the project's pipeline. Always named after the project, so at most one exists.
pub fn create_pipeline_run(l2c: &L2c, sonar_url: &str, sonar_token: &str) -> Result<PipelineRun> {
    let git = &l2c.spec.was.from.git;
    let mut git_params = vec![Param::new("url", git.url.clone())];
    if let Some(revision) = git.revision.as_ref().filter(|r| !r.is_empty()) {
        git_params.push(Param::new("revision", revision.clone()));
    }

    Ok(PipelineRun {
        metadata: metadata(l2c, l2c.name_any(), "l2c")?,
        spec: PipelineRunSpec {
            pipeline_ref: PipelineRef { name: l2c.name_any() },
            service_account_name: Some(l2c.name_any()),
            resources: vec![
                PipelineResourceBinding {
                    name: RESOURCE_GIT.to_string(),
                    resource_spec: PipelineResourceSpec {
                        type_: "git".to_string(),
                        params: git_params,
                    },
                },
                PipelineResourceBinding {
                    name: RESOURCE_IMAGE.to_string(),
                    resource_spec: PipelineResourceSpec {
                        type_: "image".to_string(),
                        params: vec![Param::new("url", l2c.spec.was.to.image.url.clone())],
                    },
                },
            ],
            params: vec![
                Param::new(PARAM_SONAR_URL, sonar_url),
                Param::new(PARAM_SONAR_TOKEN, sonar_token),
                Param::new(PARAM_SONAR_PROJECT, l2c.project_key()?),
            ],
        },
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::resources::fixtures;
    use crate::util::crypto::PasswordCipher;

    fn param<'a>(params: &'a [Param], name: &str) -> &'a str {
        params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
            .unwrap()
    }

    #[test]
    fn tasks_run_in_fixed_order() {
        let pipeline = create_pipeline(&fixtures::l2c(), &OperatorConfig::default()).unwrap();
        let names: Vec<_> = pipeline.spec.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["analyze", "migrate", "build", "deploy"]);
        let after: Vec<_> = pipeline.spec.tasks.iter().map(|t| t.run_after.clone()).collect();
        assert_eq!(
            after,
            vec![vec![], vec!["analyze".to_string()], vec!["migrate".to_string()], vec!["build".to_string()]]
        );
        assert!(pipeline.spec.tasks.iter().all(|t| t.task_ref.kind == "ClusterTask"));
    }

    #[test]
    fn migration_is_skipped_without_db() {
        let pipeline = create_pipeline(&fixtures::l2c(), &OperatorConfig::default()).unwrap();
        let migrate = &pipeline.spec.tasks[1].params;
        assert_eq!(param(migrate, "DO_MIGRATE_DB"), "FALSE");

        let build = &pipeline.spec.tasks[2].params;
        assert_eq!(param(build, "BUILDER_IMAGE"), "tmaxcloudck/s2i-jeus:8");
        assert_eq!(param(build, "REGISTRY_SECRET_NAME"), "regcred");
    }

    #[test]
    fn migration_targets_the_db_service() {
        let cipher = PasswordCipher::new("key");
        let l2c = fixtures::with_db(
            fixtures::l2c(),
            &cipher.encrypt("a").unwrap(),
            &cipher.encrypt("b").unwrap(),
        );
        let pipeline = create_pipeline(&l2c, &OperatorConfig::default()).unwrap();
        let migrate = &pipeline.spec.tasks[1].params;
        assert_eq!(param(migrate, "DO_MIGRATE_DB"), "TRUE");
        assert_eq!(param(migrate, "SOURCE_TYPE"), "ORACLE");
        assert_eq!(param(migrate, "TARGET_HOST"), "shop-db");
        assert_eq!(param(migrate, "TARGET_PORT"), "8629");
    }

    #[test]
    fn run_binds_sources_and_analysis_parameters() {
        let run = create_pipeline_run(&fixtures::l2c(), "http://sonar:9000", "tok").unwrap();
        assert_eq!(run.name_any(), "shop");
        assert_eq!(run.spec.service_account_name.as_deref(), Some("shop"));
        assert_eq!(param(&run.spec.params, PARAM_SONAR_PROJECT), "demo_shop");
        assert_eq!(param(&run.spec.params, PARAM_SONAR_TOKEN), "tok");
        let git = &run.spec.resources[0].resource_spec.params;
        assert_eq!(param(git, "revision"), "main");
    }
}
