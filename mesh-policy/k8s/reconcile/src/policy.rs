use crate::{
    k8s::{labels::Map, DynamicObject, Selector},
    Cluster, Error, ResourceManager,
};
use mesh_policy_core::{AppIdentity, MeshPolicy, MeshType, APP_NAME_LABEL};
use mesh_policy_k8s_translate::Registry;
use tracing::{debug, error};

/// Distinguishes the objects of different managers acting for the same application.
pub const SCOPE_LABEL: &str = "kubernetes-resource-handler-scope";

/// Manages the policy objects that implement an application's [`MeshPolicy`] records.
///
/// Policies are translated for the mesh the application is connected to and the resulting
/// objects are converged with those already in the cluster. Objects are owned through the
/// manager's labels, which should be unique to the requesting application; see
/// [`default_labels`].
#[derive(Debug)]
pub struct PolicyResourceManager<C> {
    requester: AppIdentity,
    registry: Registry,
    resources: ResourceManager<C>,
}

/// Labels that identify the objects managed for `app_name` in `namespace` within `scope`.
pub fn default_labels(app_name: &str, namespace: &str, scope: &str) -> Map {
    Map::from([
        (
            APP_NAME_LABEL.to_string(),
            format!("{app_name}-{namespace}"),
        ),
        (SCOPE_LABEL.to_string(), scope.to_string()),
    ])
}

// === impl PolicyResourceManager ===

impl<C: Cluster> PolicyResourceManager<C> {
    /// Manages the objects of every type `registry` can produce.
    pub fn new(
        client: C,
        requester: AppIdentity,
        registry: Registry,
        labels: impl Into<Map>,
        field_manager: impl Into<String>,
    ) -> Self {
        let resources = ResourceManager::new(
            client,
            Selector::from_map(labels.into()),
            registry.all_resource_types(),
            field_manager,
        );
        Self {
            requester,
            registry,
            resources,
        }
    }

    pub fn labels(&self) -> &Selector {
        self.resources.labels()
    }

    /// Translates `policies` for `mesh` without touching the cluster.
    pub fn build(
        &self,
        policies: &[MeshPolicy],
        mesh: MeshType,
    ) -> Result<Vec<DynamicObject>, Error> {
        Ok(self.registry.build(mesh, &self.requester, policies)?)
    }

    /// Converges the cluster with `policies` and any prebuilt `raw` objects.
    ///
    /// When there is nothing to deploy, every owned object is deleted. `force` takes
    /// ownership of fields managed by other writers. `ignore_missing` tolerates objects and
    /// resource types that are already absent.
    pub async fn reconcile(
        &self,
        policies: &[MeshPolicy],
        mesh: MeshType,
        raw: Vec<DynamicObject>,
        force: bool,
        ignore_missing: bool,
    ) -> Result<(), Error> {
        self.validate_raw(&raw)?;

        let mut desired = self.build(policies, mesh)?;
        desired.extend(raw);
        debug!(
            app = %self.requester.app_name,
            namespace = %self.requester.namespace,
            policies = policies.len(),
            objects = desired.len(),
            "Reconciling policy objects",
        );

        if desired.is_empty() {
            return self.delete(ignore_missing).await;
        }
        self.resources.reconcile(desired, force, ignore_missing).await
    }

    /// Deletes every policy object this manager owns.
    pub async fn delete(&self, ignore_missing: bool) -> Result<(), Error> {
        self.resources.delete(ignore_missing).await
    }

    /// Fails on the first object that is not of a type a registered mesh produces.
    fn validate_raw(&self, raw: &[DynamicObject]) -> Result<(), Error> {
        for obj in raw {
            if let Err(err) = self.resources.resource_of(obj) {
                error!(%err, "Unsupported raw policy");
                return Err(err);
            }
        }
        Ok(())
    }
}
