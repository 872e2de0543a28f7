//! [`ivory::Executor`] bound to one container of one pod.

use ivory::{ExecError, Executor, Output};
use ivory_store::PodExec;

pub struct PodExecutor<'a> {
    exec: &'a dyn PodExec,
    namespace: &'a str,
    pod: &'a str,
    container: &'a str,
}

impl<'a> PodExecutor<'a> {
    pub fn new(exec: &'a dyn PodExec, namespace: &'a str, pod: &'a str, container: &'a str) -> Self {
        Self {
            exec,
            namespace,
            pod,
            container,
        }
    }
}

impl std::fmt::Debug for PodExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodExecutor")
            .field("namespace", &self.namespace)
            .field("pod", &self.pod)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<'a> Executor for PodExecutor<'a> {
    async fn exec(&self, stdin: Option<&str>, command: &[String]) -> Result<Output, ExecError> {
        let output = self
            .exec
            .exec(self.namespace, self.pod, self.container, stdin, command)
            .await
            .map_err(|e| ExecError::Command(e.to_string()))?;
        Ok(Output {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
