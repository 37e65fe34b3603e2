use anyhow::{Context, Result};
use mesh_policy_core::{
    build_mesh_policies,
    relation::{cross_model_sources, decode_policies, Databag},
    AppIdentity, MeshPolicy, MeshType, Policy, Topology,
};
use mesh_policy_k8s_api::{labels::Map, DynamicObject};
use mesh_policy_k8s_reconcile::default_labels;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path};
use tracing::debug;

/// Describes an application's policies and the relations they apply to.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The application the policies are enforced for.
    pub app: String,
    pub namespace: String,

    #[serde(default = "default_mesh")]
    pub mesh: MeshType,

    /// Distinguishes this application's policy objects from others it manages.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Overrides the labels used to find the managed objects.
    #[serde(default)]
    pub labels: Option<Map>,

    /// Access rules, each attached to a relation endpoint.
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// The applications currently related on each relation endpoint.
    #[serde(default)]
    pub topology: Topology,

    /// Databags from cross-boundary relations, keyed by the related application's local name.
    #[serde(default)]
    pub cross_model: BTreeMap<String, Databag>,

    /// Databags published by consumers whose requested policies are enforced as well.
    #[serde(default)]
    pub consumers: Vec<Databag>,

    /// Prebuilt policy objects deployed alongside the translated ones.
    #[serde(default)]
    pub raw: Vec<DynamicObject>,

    #[serde(default = "default_true")]
    pub force: bool,

    #[serde(default = "default_true")]
    pub ignore_missing: bool,
}

fn default_mesh() -> MeshType {
    MeshType::Istio
}

fn default_scope() -> String {
    "policy".to_string()
}

fn default_true() -> bool {
    true
}

// === impl Config ===

impl Config {
    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn identity(&self) -> AppIdentity {
        AppIdentity::new(&self.app, &self.namespace)
    }

    pub fn manager_labels(&self) -> Map {
        self.labels
            .clone()
            .unwrap_or_else(|| default_labels(&self.app, &self.namespace, &self.scope))
    }

    /// Resolves the declared policies against the topology and appends the policies
    /// consumers have requested.
    pub fn mesh_policies(&self) -> Result<Vec<MeshPolicy>> {
        let sources = cross_model_sources(
            self.cross_model
                .iter()
                .map(|(app, databag)| (app.as_str(), databag)),
        );
        let mut policies =
            build_mesh_policies(&self.topology, &self.identity(), &self.policies, &sources)?;
        let requested = decode_policies(&self.consumers).context("invalid consumer policies")?;
        debug!(
            declared = policies.len(),
            requested = requested.len(),
            "Resolved policies"
        );
        policies.extend(requested);
        Ok(policies)
    }
}
