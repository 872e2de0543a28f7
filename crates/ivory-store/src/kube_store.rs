//! ObjectStore and PodExec backed by the Kubernetes API.

use crate::error::StoreError;
use crate::registry::Registry;
use crate::store::{DeleteOptions, ExecOutput, Kind, LabelSelector, ObjectStore, PodExec, Propagation};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    PropagationPolicy,
};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    registry: Registry,
    field_manager: String,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client, registry: &Registry, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            registry: registry.clone(),
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, kind: Kind, namespace: &str) -> Result<Api<DynamicObject>, StoreError> {
        let resource = self.registry.resource(kind)?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, resource))
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.api(kind, namespace)?.get_opt(name).await?)
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let query = selector.to_query();
        let mut params = ListParams::default();
        if !query.is_empty() {
            params = params.labels(&query);
        }
        Ok(self.api(kind, namespace)?.list(&params).await?.items)
    }

    async fn create(
        &self,
        kind: Kind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(self.api(kind, namespace)?.create(&params, obj).await?)
    }

    async fn merge_patch(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        Ok(self
            .api(kind, namespace)?
            .patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        Ok(self
            .api(kind, namespace)?
            .patch_status(name, &self.patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: options.preconditions.as_ref().map(|p| kube::api::Preconditions {
                uid: p.uid.clone(),
                resource_version: p.resource_version.clone(),
            }),
            propagation_policy: options.propagation.map(|p| match p {
                Propagation::Background => PropagationPolicy::Background,
                Propagation::Foreground => PropagationPolicy::Foreground,
                Propagation::Orphan => PropagationPolicy::Orphan,
            }),
            ..Default::default()
        };
        self.api(kind, namespace)?.delete(name, &params).await?;
        Ok(())
    }
}

async fn read_all(stream: Option<impl AsyncRead + Unpin>) -> Result<String, StoreError> {
    let mut out = String::new();
    if let Some(mut stream) = stream {
        stream
            .read_to_string(&mut out)
            .await
            .map_err(|e| StoreError::Exec(e.to_string()))?;
    }
    Ok(out)
}

#[async_trait::async_trait]
impl PodExec for KubeStore {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        stdin: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, StoreError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);

        debug!(namespace, pod, container, command = ?command.first(), "exec");
        let mut attached = pods.exec(pod, command.to_vec(), &params).await?;

        if let (Some(input), Some(mut writer)) = (stdin, attached.stdin()) {
            writer
                .write_all(input.as_bytes())
                .await
                .map_err(|e| StoreError::Exec(e.to_string()))?;
            writer
                .shutdown()
                .await
                .map_err(|e| StoreError::Exec(e.to_string()))?;
        }

        let status = attached.take_status();
        let (stdout, stderr) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::join!(read_all(stdout), read_all(stderr));
        let output = ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
        };

        // A non-zero exit is reported as a Status with "Failure".
        if let Some(status) = status {
            if let Some(status) = status.await {
                let status = serde_json::to_value(&status)?;
                if status.get("status").and_then(serde_json::Value::as_str) == Some("Failure") {
                    let message = status
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default();
                    return Err(StoreError::Exec(format!("{message}: {}", output.stderr)));
                }
            }
        }

        Ok(output)
    }
}
