//! [`PodExecutor`] that records calls instead of reaching a pod.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::exec::{ExecOutput, PodExecutor};
use crate::util::errors::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecCall {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
}

/// Records every exec and answers with a fixed output.
#[derive(Clone, Debug, Default)]
pub struct RecordingExecutor {
    calls: Arc<Mutex<Vec<ExecCall>>>,
    output: Arc<Mutex<ExecOutput>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, output: ExecOutput) {
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = output;
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PodExecutor for RecordingExecutor {
    async fn exec(&self, namespace: &str, pod: &str, container: &str, command: Vec<String>) -> Result<ExecOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecCall {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                command,
            });
        Ok(self.output.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
