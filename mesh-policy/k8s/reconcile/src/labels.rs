use crate::{
    is_not_found,
    k8s::{
        labels::Map, ApiResource, ConfigMap, DynamicObject, ObjectMeta, Service, StatefulSet,
    },
    Cluster, Error,
};
use serde_json::{json, Value};
use tracing::{debug, info};

const LABELS_KEY: &str = "labels";

/// Adds and removes labels on an application's pods and service.
///
/// The labels applied by the last call are recorded in a `ConfigMap` so that a later call
/// can remove the ones no longer requested without disturbing labels set by anyone else.
/// Pods are labeled through the application's `StatefulSet` pod template.
#[derive(Debug)]
pub struct LabelReconciler<C> {
    client: C,
    app_name: String,
    namespace: String,
    config_map: String,
}

/// The name of the `ConfigMap` recording the labels managed for `app_name`.
pub fn label_config_map_name(app_name: &str) -> String {
    format!("service-mesh-{app_name}-labels")
}

// === impl LabelReconciler ===

impl<C: Cluster> LabelReconciler<C> {
    /// Reconciles labels on the `StatefulSet` and `Service` named `app_name`.
    pub fn new(client: C, app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            client,
            config_map: label_config_map_name(&app_name),
            app_name,
            namespace: namespace.into(),
        }
    }

    pub fn config_map_name(&self) -> &str {
        &self.config_map
    }

    /// Sets exactly `labels`, removing any previously managed label that is not among them.
    pub async fn reconcile(&self, labels: &Map) -> Result<(), Error> {
        let previous = self.managed_labels().await?;

        let mut patch = labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        for key in previous.keys() {
            if !labels.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
        let patch = Value::Object(patch);
        debug!(app = %self.app_name, namespace = %self.namespace, %patch, "Patching labels");

        // Workloads are patched before the record is updated so that a failure leaves the
        // removals pending for the next call.
        self.patch(
            ApiResource::erase::<StatefulSet>(&()),
            &self.app_name,
            json!({ "spec": { "template": { "metadata": { "labels": patch } } } }),
        )
        .await?;
        self.patch(
            ApiResource::erase::<Service>(&()),
            &self.app_name,
            json!({ "metadata": { "labels": patch } }),
        )
        .await?;

        let managed = serde_json::to_string(labels).map_err(|source| self.json_error(source))?;
        self.patch(
            ApiResource::erase::<ConfigMap>(&()),
            &self.config_map,
            json!({ "data": { LABELS_KEY: managed } }),
        )
        .await?;
        Ok(())
    }

    /// Removes every managed label and deletes the record of them.
    pub async fn clear(&self) -> Result<(), Error> {
        self.reconcile(&Map::new()).await?;

        let resource = ApiResource::erase::<ConfigMap>(&());
        match self
            .client
            .delete(&resource, &self.namespace, &self.config_map)
            .await
        {
            Ok(()) => Ok(()),
            Err(error) if is_not_found(&error) => {
                info!(name = %self.config_map, "Label ConfigMap already deleted");
                Ok(())
            }
            Err(source) => Err(self.object_error("delete", &resource, &self.config_map, source)),
        }
    }

    /// Reads the labels set by the previous call, creating an empty record if there is none.
    pub async fn managed_labels(&self) -> Result<Map, Error> {
        let resource = ApiResource::erase::<ConfigMap>(&());
        let config_map = match self
            .client
            .get(&resource, &self.namespace, &self.config_map)
            .await
        {
            Ok(cm) => cm,
            Err(error) if is_not_found(&error) => {
                self.create_record(&resource).await?;
                return Ok(Map::new());
            }
            Err(source) => {
                return Err(self.object_error("get", &resource, &self.config_map, source))
            }
        };

        match config_map.data.get("data").and_then(|d| d.get(LABELS_KEY)) {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).map_err(|source| self.json_error(source))
            }
            _ => Ok(Map::new()),
        }
    }

    async fn create_record(&self, resource: &ApiResource) -> Result<(), Error> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.config_map.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            data: Some([(LABELS_KEY.to_string(), "{}".to_string())].into()),
            ..ConfigMap::default()
        };
        let obj = serde_json::to_value(&config_map)
            .and_then(serde_json::from_value::<DynamicObject>)
            .map_err(|source| self.json_error(source))?;

        info!(name = %self.config_map, namespace = %self.namespace, "Creating label ConfigMap");
        self.client
            .create(resource, &self.namespace, &obj)
            .await
            .map_err(|source| self.object_error("create", resource, &self.config_map, source))?;
        Ok(())
    }

    async fn patch(&self, resource: ApiResource, name: &str, patch: Value) -> Result<(), Error> {
        self.client
            .patch_merge(&resource, &self.namespace, name, &patch)
            .await
            .map_err(|source| self.object_error("patch", &resource, name, source))?;
        Ok(())
    }

    fn object_error(
        &self,
        verb: &'static str,
        resource: &ApiResource,
        name: &str,
        source: crate::k8s::Error,
    ) -> Error {
        Error::Object {
            verb,
            kind: resource.kind.clone(),
            namespace: self.namespace.clone(),
            name: name.to_string(),
            source,
        }
    }

    fn json_error(&self, source: serde_json::Error) -> Error {
        Error::Json {
            what: "managed labels",
            namespace: self.namespace.clone(),
            name: self.config_map.clone(),
            source,
        }
    }
}
