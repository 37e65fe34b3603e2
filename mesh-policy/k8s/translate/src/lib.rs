#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod istio;
mod registry;

pub use self::{istio::IstioTranslator, registry::Registry};
use mesh_policy_core::{AppIdentity, MeshPolicy, MeshType};
use mesh_policy_k8s_api::{ApiResource, DynamicObject};

/// Converts mesh-agnostic policies into the resources a specific mesh enforces.
pub trait Translate: Send + Sync {
    /// The resource types this translator produces.
    fn resource_types(&self) -> Vec<ApiResource>;

    /// Builds the resources implementing `policies` on behalf of `requester`.
    ///
    /// Policies the mesh cannot represent are logged and skipped.
    fn build(
        &self,
        requester: &AppIdentity,
        policies: &[MeshPolicy],
    ) -> Result<Vec<DynamicObject>, TranslateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("no policy translator registered for mesh type {0}")]
    UnknownMeshType(MeshType),

    #[error("failed to encode {kind} {namespace}/{name}: {source}")]
    Encode {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
