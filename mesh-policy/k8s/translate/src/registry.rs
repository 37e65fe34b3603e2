use crate::{IstioTranslator, Translate, TranslateError};
use ahash::AHashMap as HashMap;
use mesh_policy_core::{AppIdentity, MeshPolicy, MeshType};
use mesh_policy_k8s_api::{ApiResource, DynamicObject};
use std::sync::Arc;

/// Maps each supported mesh to the translator that implements its policies.
#[derive(Clone)]
pub struct Registry {
    translators: HashMap<MeshType, Arc<dyn Translate>>,
}

// === impl Registry ===

impl Default for Registry {
    fn default() -> Self {
        Self::empty().with(MeshType::Istio, IstioTranslator::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut meshes = self.translators.keys().collect::<Vec<_>>();
        meshes.sort();
        f.debug_struct("Registry")
            .field("meshes", &meshes)
            .finish()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            translators: HashMap::default(),
        }
    }

    /// Registers `translator` for `mesh`, replacing any existing translator.
    pub fn register(&mut self, mesh: MeshType, translator: impl Translate + 'static) {
        self.translators.insert(mesh, Arc::new(translator));
    }

    pub fn with(mut self, mesh: MeshType, translator: impl Translate + 'static) -> Self {
        self.register(mesh, translator);
        self
    }

    pub fn get(&self, mesh: MeshType) -> Result<Arc<dyn Translate>, TranslateError> {
        self.translators
            .get(&mesh)
            .cloned()
            .ok_or(TranslateError::UnknownMeshType(mesh))
    }

    /// Translates `policies` with the translator registered for `mesh`.
    pub fn build(
        &self,
        mesh: MeshType,
        requester: &AppIdentity,
        policies: &[MeshPolicy],
    ) -> Result<Vec<DynamicObject>, TranslateError> {
        self.get(mesh)?.build(requester, policies)
    }

    /// The resource types `mesh` produces.
    pub fn resource_types(&self, mesh: MeshType) -> Result<Vec<ApiResource>, TranslateError> {
        Ok(self.get(mesh)?.resource_types())
    }

    /// Every resource type any registered mesh produces, without duplicates.
    pub fn all_resource_types(&self) -> Vec<ApiResource> {
        let mut meshes = self.translators.keys().copied().collect::<Vec<_>>();
        meshes.sort();
        let mut types = Vec::<ApiResource>::new();
        for mesh in meshes {
            for ar in self.translators[&mesh].resource_types() {
                if !types.contains(&ar) {
                    types.push(ar);
                }
            }
        }
        types
    }
}
