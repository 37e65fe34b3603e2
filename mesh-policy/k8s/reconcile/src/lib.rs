#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Converges cluster state with the policies and labels an application requests.
//!
//! Nothing here retries. Every failure other than an expected absence is returned to the
//! caller, which is expected to reconcile again on a later event.

mod cluster;
mod labels;
mod policy;
mod resources;

#[cfg(test)]
mod fake;

pub use self::{
    cluster::Cluster,
    labels::{label_config_map_name, LabelReconciler},
    policy::{default_labels, PolicyResourceManager, SCOPE_LABEL},
    resources::{Deployed, ResourceManager},
};
use mesh_policy_k8s_api as k8s;
use mesh_policy_k8s_translate::TranslateError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "{api_version}/{kind} {name} is not a supported policy resource type; supported types: {supported}"
    )]
    UnsupportedResource {
        api_version: String,
        kind: String,
        name: String,
        supported: String,
    },

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("{kind} object is missing metadata.{field}")]
    MissingMetadata { kind: String, field: &'static str },

    #[error("failed to list {kind} with labels {selector}: {source}")]
    List {
        kind: String,
        selector: String,
        #[source]
        source: k8s::Error,
    },

    #[error("failed to {verb} {kind} {namespace}/{name}: {source}")]
    Object {
        verb: &'static str,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: k8s::Error,
    },

    #[error("invalid {what} in {namespace}/{name}: {source}")]
    Json {
        what: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Indicates that an object, or its resource type, does not exist.
///
/// The API server answers requests for a resource type whose CRD is not installed with a
/// 404 as well.
fn is_not_found(error: &k8s::Error) -> bool {
    matches!(error, k8s::Error::Api(rsp) if rsp.code == 404)
}
