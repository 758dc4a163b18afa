use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::util::errors::{Error, Result, StdError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command inside a container of a running pod.
#[async_trait]
pub trait PodExecutor: Send + Sync {
    async fn exec(&self, namespace: &str, pod: &str, container: &str, command: Vec<String>) -> Result<ExecOutput>;
}

/// [`PodExecutor`] over the API server's exec subresource.
#[derive(Clone)]
pub struct KubeExecutor {
    client: Client,
}

impl KubeExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn read_all(reader: Option<impl tokio::io::AsyncRead + Unpin>) -> Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader
            .read_to_string(&mut out)
            .await
            .map_err(|e| Error::StdError(StdError::ExecError(format!("cannot read exec stream: {e}"))))?;
    }
    Ok(out)
}

#[async_trait]
impl PodExecutor for KubeExecutor {
    async fn exec(&self, namespace: &str, pod: &str, container: &str, command: Vec<String>) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let attach_params = AttachParams {
            container: Some(container.to_string()),
            tty: false,
            stdin: false,
            stdout: true,
            stderr: true,
            max_stdin_buf_size: None,
            max_stdout_buf_size: None,
            max_stderr_buf_size: None,
        };

        debug!("exec {:?} in {}/{} ({})", command, namespace, pod, container);
        let mut attached = pods
            .exec(pod, command, &attach_params)
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

        let (out, err) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::join!(read_all(out), read_all(err));
        let (stdout, mut stderr) = (stdout?, stderr?);

        if let Some(status) = attached.take_status() {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") && stderr.is_empty() {
                    stderr = status.message.unwrap_or_else(|| "command failed".to_string());
                }
            }
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

