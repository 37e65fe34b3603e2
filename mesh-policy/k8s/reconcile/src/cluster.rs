use crate::k8s::{
    self, Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams,
    PostParams, Selector,
};

/// The cluster operations the reconcilers depend on.
///
/// Implemented for [`kube::Client`]; tests substitute an in-memory cluster.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Lists objects of `resource` matching `selector`, in `namespace` or in all namespaces.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>, k8s::Error>;

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, k8s::Error>;

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, k8s::Error>;

    /// Creates or replaces `obj` with a server-side apply.
    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        obj: &DynamicObject,
        params: &PatchParams,
    ) -> Result<DynamicObject, k8s::Error>;

    /// Applies a JSON merge patch. `null` values remove the corresponding keys.
    async fn patch_merge(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, k8s::Error>;

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), k8s::Error>;
}

fn api(client: &k8s::Client, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, resource),
        None => Api::all_with(client.clone(), resource),
    }
}

#[async_trait::async_trait]
impl Cluster for k8s::Client {
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>, k8s::Error> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = api(self, resource, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, k8s::Error> {
        api(self, resource, Some(namespace)).get(name).await
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, k8s::Error> {
        api(self, resource, Some(namespace))
            .create(&PostParams::default(), obj)
            .await
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        obj: &DynamicObject,
        params: &PatchParams,
    ) -> Result<DynamicObject, k8s::Error> {
        api(self, resource, Some(namespace))
            .patch(name, params, &Patch::Apply(obj))
            .await
    }

    async fn patch_merge(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, k8s::Error> {
        api(self, resource, Some(namespace))
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), k8s::Error> {
        api(self, resource, Some(namespace))
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
