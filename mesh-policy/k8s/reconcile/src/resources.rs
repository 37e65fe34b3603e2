use crate::{
    is_not_found,
    k8s::{ApiResource, DynamicObject, PatchParams, ResourceExt, Selector},
    Cluster, Error,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Converges the set of objects carrying a fixed set of labels.
///
/// Objects are owned by the manager when they match its labels. Every object the manager
/// applies is given those labels, so a later [`ResourceManager::reconcile`] finds it again.
#[derive(Debug)]
pub struct ResourceManager<C> {
    client: C,
    labels: Selector,
    resource_types: Vec<ApiResource>,
    namespace: Option<String>,
    field_manager: String,
}

/// Identifies an object independently of its contents.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectId {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

/// An object paired with the resource type it belongs to.
#[derive(Clone, Debug)]
pub struct Deployed {
    pub resource: ApiResource,
    pub object: DynamicObject,
}

// === impl ResourceManager ===

impl<C: Cluster> ResourceManager<C> {
    /// Manages objects of `resource_types` matching `labels`, across all namespaces.
    pub fn new(
        client: C,
        labels: Selector,
        resource_types: Vec<ApiResource>,
        field_manager: impl Into<String>,
    ) -> Self {
        Self {
            client,
            labels,
            resource_types,
            namespace: None,
            field_manager: field_manager.into(),
        }
    }

    /// Restricts the manager to a single namespace. Objects without a namespace are
    /// created in it.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn labels(&self) -> &Selector {
        &self.labels
    }

    /// Lists every object the manager owns.
    ///
    /// When `ignore_missing` is set, resource types that are not installed in the cluster
    /// are treated as having no objects.
    pub async fn get_deployed(&self, ignore_missing: bool) -> Result<Vec<Deployed>, Error> {
        let mut deployed = Vec::new();
        for resource in &self.resource_types {
            let objects = match self
                .client
                .list(resource, self.namespace.as_deref(), &self.labels)
                .await
            {
                Ok(objects) => objects,
                Err(error) if ignore_missing && is_not_found(&error) => {
                    info!(kind = %resource.kind, %error, "Resource type is not installed");
                    continue;
                }
                Err(source) => {
                    return Err(Error::List {
                        kind: resource.kind.clone(),
                        selector: self.labels.to_string(),
                        source,
                    })
                }
            };
            deployed.extend(objects.into_iter().map(|object| Deployed {
                resource: resource.clone(),
                object,
            }));
        }
        Ok(deployed)
    }

    /// Creates or updates `objects`, labeling each as owned by this manager.
    pub async fn apply(&self, objects: Vec<DynamicObject>, force: bool) -> Result<(), Error> {
        let mut params = PatchParams::apply(&self.field_manager);
        if force {
            params = params.force();
        }

        for mut object in objects {
            let resource = self.resource_of(&object)?.clone();
            let (namespace, name) = self.locate(&resource, &object)?;
            object.metadata.namespace = Some(namespace.clone());
            object
                .labels_mut()
                .extend(self.labels.match_labels().clone());

            debug!(kind = %resource.kind, %namespace, %name, "Applying");
            self.client
                .apply(&resource, &namespace, &name, &object, &params)
                .await
                .map_err(|source| Error::Object {
                    verb: "apply",
                    kind: resource.kind.clone(),
                    namespace: namespace.clone(),
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Deletes every object the manager owns.
    pub async fn delete(&self, ignore_missing: bool) -> Result<(), Error> {
        for deployed in self.get_deployed(ignore_missing).await? {
            self.delete_one(&deployed, ignore_missing).await?;
        }
        Ok(())
    }

    /// Makes the owned objects match `desired` exactly.
    ///
    /// Owned objects absent from `desired` are deleted and then every desired object is
    /// applied in full.
    pub async fn reconcile(
        &self,
        desired: Vec<DynamicObject>,
        force: bool,
        ignore_missing: bool,
    ) -> Result<(), Error> {
        let mut keep = BTreeSet::new();
        for object in &desired {
            let resource = self.resource_of(object)?;
            let (namespace, name) = self.locate(resource, object)?;
            keep.insert(ObjectId::new(resource, namespace, name));
        }

        for deployed in self.get_deployed(ignore_missing).await? {
            let id = ObjectId::new(
                &deployed.resource,
                deployed.object.namespace().unwrap_or_default(),
                deployed.object.name_any(),
            );
            if !keep.contains(&id) {
                self.delete_one(&deployed, ignore_missing).await?;
            }
        }

        self.apply(desired, force).await
    }

    pub(crate) async fn delete_one(
        &self,
        deployed: &Deployed,
        ignore_missing: bool,
    ) -> Result<(), Error> {
        let Deployed { resource, object } = deployed;
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();

        debug!(kind = %resource.kind, %namespace, %name, "Deleting");
        match self.client.delete(resource, &namespace, &name).await {
            Ok(()) => Ok(()),
            Err(error) if ignore_missing && is_not_found(&error) => {
                info!(kind = %resource.kind, %namespace, %name, "Already deleted");
                Ok(())
            }
            Err(source) => Err(Error::Object {
                verb: "delete",
                kind: resource.kind.clone(),
                namespace,
                name,
                source,
            }),
        }
    }

    /// Finds the managed resource type an object belongs to.
    pub(crate) fn resource_of(&self, object: &DynamicObject) -> Result<&ApiResource, Error> {
        let (api_version, kind) = object
            .types
            .as_ref()
            .map(|t| (t.api_version.as_str(), t.kind.as_str()))
            .unwrap_or_default();
        self.resource_types
            .iter()
            .find(|ar| ar.api_version == api_version && ar.kind == kind)
            .ok_or_else(|| Error::UnsupportedResource {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                name: object.name_any(),
                supported: self
                    .resource_types
                    .iter()
                    .map(|ar| format!("{}/{}", ar.api_version, ar.kind))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn locate(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<(String, String), Error> {
        let missing = |field| Error::MissingMetadata {
            kind: resource.kind.clone(),
            field,
        };
        let name = object.metadata.name.clone().ok_or_else(|| missing("name"))?;
        let namespace = object
            .metadata
            .namespace
            .clone()
            .or_else(|| self.namespace.clone())
            .ok_or_else(|| missing("namespace"))?;
        Ok((namespace, name))
    }
}

// === impl ObjectId ===

impl ObjectId {
    fn new(resource: &ApiResource, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}
