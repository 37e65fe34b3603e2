//! An in-memory cluster.

use crate::{
    k8s::{self, ApiResource, DynamicObject, ErrorResponse, Labels, PatchParams, Selector},
    Cluster,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Default)]
pub struct FakeCluster(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    uninstalled: Vec<(String, String)>,
    applied: Vec<PatchParams>,
    calls: usize,
}

type Key = (String, String, String, String);

fn key(resource: &ApiResource, namespace: &str, name: &str) -> Key {
    (
        resource.api_version.clone(),
        resource.kind.clone(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn error(code: u16, reason: &str, message: String) -> k8s::Error {
    k8s::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn not_found(resource: &ApiResource, name: &str) -> k8s::Error {
    error(
        404,
        "NotFound",
        format!("{} \"{name}\" not found", resource.plural),
    )
}

fn decode(value: &Value) -> DynamicObject {
    serde_json::from_value(value.clone()).expect("stored objects must be valid")
}

/// Applies an RFC 7386 merge patch.
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    let Value::Object(target) = target else {
        unreachable!()
    };
    for (k, v) in patch {
        if v.is_null() {
            target.remove(k);
        } else {
            merge(target.entry(k.clone()).or_insert(Value::Null), v);
        }
    }
}

impl FakeCluster {
    /// Stores an object directly, as another actor would.
    pub fn insert(&self, resource: &ApiResource, obj: DynamicObject) {
        let mut value = serde_json::to_value(&obj).unwrap();
        value["apiVersion"] = resource.api_version.clone().into();
        value["kind"] = resource.kind.clone().into();
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap();
        self.0
            .lock()
            .objects
            .insert(key(resource, &ns, &name), value);
    }

    /// Makes requests for `resource` fail as they do when its CRD is not installed.
    pub fn uninstall(&self, resource: &ApiResource) {
        self.0
            .lock()
            .uninstalled
            .push((resource.api_version.clone(), resource.kind.clone()));
    }

    pub fn get_value(&self, resource: &ApiResource, namespace: &str, name: &str) -> Option<Value> {
        self.0
            .lock()
            .objects
            .get(&key(resource, namespace, name))
            .cloned()
    }

    /// Returns `namespace/name` of every stored object of `resource`.
    pub fn names(&self, resource: &ApiResource) -> Vec<String> {
        self.0
            .lock()
            .objects
            .keys()
            .filter(|(v, k, _, _)| *v == resource.api_version && *k == resource.kind)
            .map(|(_, _, ns, name)| format!("{ns}/{name}"))
            .collect()
    }

    /// The parameters of every server-side apply, in order.
    pub fn applied(&self) -> Vec<PatchParams> {
        self.0.lock().applied.clone()
    }

    /// The number of requests made so far.
    pub fn calls(&self) -> usize {
        self.0.lock().calls
    }

    fn begin(&self, resource: &ApiResource) -> Result<parking_lot::MutexGuard<'_, State>, k8s::Error> {
        let mut state = self.0.lock();
        state.calls += 1;
        let installed = !state
            .uninstalled
            .iter()
            .any(|(v, k)| *v == resource.api_version && *k == resource.kind);
        if !installed {
            return Err(error(
                404,
                "NotFound",
                "the server could not find the requested resource".to_string(),
            ));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Cluster for FakeCluster {
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>, k8s::Error> {
        let state = self.begin(resource)?;
        Ok(state
            .objects
            .iter()
            .filter(|((v, k, ns, _), _)| {
                *v == resource.api_version
                    && *k == resource.kind
                    && namespace.map_or(true, |n| n == ns)
            })
            .map(|(_, value)| decode(value))
            .filter(|obj| selector.matches(&Labels::from(obj.metadata.labels.clone())))
            .collect())
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, k8s::Error> {
        let state = self.begin(resource)?;
        state
            .objects
            .get(&key(resource, namespace, name))
            .map(decode)
            .ok_or_else(|| not_found(resource, name))
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, k8s::Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        {
            let state = self.begin(resource)?;
            if state.objects.contains_key(&key(resource, namespace, &name)) {
                return Err(error(
                    409,
                    "AlreadyExists",
                    format!("{} \"{name}\" already exists", resource.plural),
                ));
            }
        }
        let mut obj = obj.clone();
        obj.metadata.namespace = Some(namespace.to_string());
        self.insert(resource, obj.clone());
        Ok(obj)
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        obj: &DynamicObject,
        params: &PatchParams,
    ) -> Result<DynamicObject, k8s::Error> {
        self.begin(resource)?.applied.push(params.clone());
        let mut obj = obj.clone();
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.name = Some(name.to_string());
        self.insert(resource, obj.clone());
        Ok(obj)
    }

    async fn patch_merge(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, k8s::Error> {
        let mut state = self.begin(resource)?;
        let value = state
            .objects
            .get_mut(&key(resource, namespace, name))
            .ok_or_else(|| not_found(resource, name))?;
        merge(value, patch);
        Ok(decode(value))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), k8s::Error> {
        let mut state = self.begin(resource)?;
        state
            .objects
            .remove(&key(resource, namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found(resource, name))
    }
}

#[test]
fn merge_patch() {
    let mut target = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
    merge(&mut target, &serde_json::json!({"a": {"b": null, "e": 4}, "d": null}));
    assert_eq!(target, serde_json::json!({"a": {"c": 2, "e": 4}}));
}
