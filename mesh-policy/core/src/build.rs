//! Resolves declared policies against the live relation topology.

use crate::{
    mesh_policy::{InvalidPolicy, MeshPolicy, MeshPolicyFields, PolicyTargetType},
    relation::CmrData,
    Endpoint, Policy,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Names an application within a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppIdentity {
    pub app_name: String,
    pub namespace: String,
}

/// A snapshot of the applications currently related over each local relation endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology(BTreeMap<String, BTreeSet<String>>);

/// Determines the true identity of a related application.
pub trait ResolveSource {
    /// Returns the identity of the application known locally as `app_name`, related to a
    /// target in `target_namespace`.
    fn resolve_source_identity(&self, app_name: &str, target_namespace: &str) -> AppIdentity;
}

/// Resolves cross-boundary applications from their published identity records, and
/// treats every other application as co-located with the target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrossModelSources(BTreeMap<String, CmrData>);

/// Builds one [`MeshPolicy`] for every pair of declared policy and application related
/// over that policy's relation endpoint.
pub fn build_mesh_policies(
    topology: &Topology,
    target: &AppIdentity,
    policies: &[Policy],
    sources: &impl ResolveSource,
) -> Result<Vec<MeshPolicy>, InvalidPolicy> {
    let mut mesh_policies = Vec::new();
    for policy in policies {
        debug!(relation = %policy.relation(), "Processing policy");
        for app in topology.related_apps(policy.relation()) {
            let source = sources.resolve_source_identity(app, &target.namespace);
            debug!(
                relation = %policy.relation(),
                %app,
                source.namespace = %source.namespace,
                source.app = %source.app_name,
                "Resolved related application",
            );

            let fields = match policy {
                Policy::Unit(declared) => MeshPolicyFields {
                    source_namespace: source.namespace,
                    source_app_name: source.app_name,
                    target_namespace: target.namespace.clone(),
                    target_app_name: Some(target.app_name.clone()),
                    target_selector_labels: None,
                    target_service: None,
                    target_type: PolicyTargetType::Unit,
                    endpoints: if declared.ports.is_empty() {
                        vec![]
                    } else {
                        vec![Endpoint::ports(declared.ports.iter().copied())]
                    },
                },
                Policy::App(declared) => MeshPolicyFields {
                    source_namespace: source.namespace,
                    source_app_name: source.app_name,
                    target_namespace: target.namespace.clone(),
                    target_app_name: Some(target.app_name.clone()),
                    target_selector_labels: None,
                    target_service: declared.service.clone(),
                    target_type: PolicyTargetType::App,
                    endpoints: declared.endpoints.clone(),
                },
            };
            mesh_policies.push(MeshPolicy::new(fields)?);
        }
    }

    Ok(mesh_policies)
}

// === impl AppIdentity ===

impl AppIdentity {
    pub fn new(app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace: namespace.into(),
        }
    }
}

// === impl Topology ===

impl Topology {
    /// Records that `app` is related over the relation endpoint named `relation`.
    pub fn relate(&mut self, relation: impl Into<String>, app: impl Into<String>) {
        self.0.entry(relation.into()).or_default().insert(app.into());
    }

    /// Returns the applications related over `relation`, if any.
    pub fn related_apps<'t>(&'t self, relation: &str) -> impl Iterator<Item = &'t str> + 't {
        self.0.get(relation).into_iter().flatten().map(String::as_str)
    }
}

impl<R: Into<String>, A: Into<String>> FromIterator<(R, A)> for Topology {
    fn from_iter<T: IntoIterator<Item = (R, A)>>(iter: T) -> Self {
        let mut topology = Self::default();
        for (relation, app) in iter {
            topology.relate(relation, app);
        }
        topology
    }
}

// === impl CrossModelSources ===

impl CrossModelSources {
    pub fn get(&self, app_name: &str) -> Option<&CmrData> {
        self.0.get(app_name)
    }
}

impl FromIterator<(String, CmrData)> for CrossModelSources {
    fn from_iter<T: IntoIterator<Item = (String, CmrData)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ResolveSource for CrossModelSources {
    fn resolve_source_identity(&self, app_name: &str, target_namespace: &str) -> AppIdentity {
        match self.0.get(app_name) {
            Some(remote) => AppIdentity::new(&remote.app_name, &remote.namespace),
            // Co-located applications share the target's namespace.
            None => AppIdentity::new(app_name, target_namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppPolicy, Method, UnitPolicy};
    use pretty_assertions::assert_eq;

    fn producer() -> AppIdentity {
        AppIdentity::new("producer", "ns")
    }

    fn data_policy() -> Policy {
        Policy::App(AppPolicy {
            relation: "data".to_string(),
            endpoints: vec![Endpoint {
                ports: Some(vec![8080]),
                methods: Some(vec![Method::Get]),
                paths: Some(vec!["/data".to_string()]),
                hosts: None,
            }],
            service: None,
        })
    }

    #[test]
    fn co_located_app_policy() {
        let topology = Topology::from_iter([("data", "consumer")]);
        let policies = build_mesh_policies(
            &topology,
            &producer(),
            &[data_policy()],
            &CrossModelSources::default(),
        )
        .unwrap();

        assert_eq!(policies.len(), 1);
        let p = &policies[0];
        assert_eq!(p.source_app_name(), "consumer");
        assert_eq!(p.source_namespace(), "ns");
        assert_eq!(p.target_namespace(), "ns");
        assert_eq!(p.target_app_name(), Some("producer"));
        assert_eq!(p.target_service(), None);
        assert_eq!(p.target_type(), PolicyTargetType::App);
        assert_eq!(
            p.endpoints(),
            &[Endpoint {
                ports: Some(vec![8080]),
                methods: Some(vec![Method::Get]),
                paths: Some(vec!["/data".to_string()]),
                hosts: None,
            }]
        );
    }

    #[test]
    fn cross_model_source_identity() {
        let topology = Topology::from_iter([("data", "remote-alias"), ("data", "local")]);
        let sources = CrossModelSources::from_iter([(
            "remote-alias".to_string(),
            CmrData {
                app_name: "consumer".to_string(),
                namespace: "other-ns".to_string(),
            },
        )]);
        let policies =
            build_mesh_policies(&topology, &producer(), &[data_policy()], &sources).unwrap();

        let sources = policies
            .iter()
            .map(|p| (p.source_app_name(), p.source_namespace()))
            .collect::<Vec<_>>();
        assert_eq!(sources, vec![("local", "ns"), ("consumer", "other-ns")]);
        assert!(policies.iter().all(|p| p.target_namespace() == "ns"));
    }

    #[test]
    fn unit_policy_endpoints() {
        let topology = Topology::from_iter([("peers", "a"), ("open", "b")]);
        let policies = build_mesh_policies(
            &topology,
            &producer(),
            &[
                Policy::Unit(UnitPolicy {
                    relation: "peers".to_string(),
                    ports: vec![9000, 9001],
                }),
                Policy::Unit(UnitPolicy {
                    relation: "open".to_string(),
                    ports: vec![],
                }),
            ],
            &CrossModelSources::default(),
        )
        .unwrap();

        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].target_type(), PolicyTargetType::Unit);
        assert_eq!(policies[0].endpoints(), &[Endpoint::ports([9000, 9001])]);
        assert_eq!(policies[0].target_service(), None);
        assert_eq!(policies[1].source_app_name(), "b");
        assert!(policies[1].endpoints().is_empty());
    }

    #[test]
    fn explicit_service_is_kept() {
        let topology = Topology::from_iter([("data", "consumer")]);
        let policy = Policy::App(AppPolicy {
            relation: "data".to_string(),
            endpoints: vec![],
            service: Some("producer-api".to_string()),
        });
        let policies = build_mesh_policies(
            &topology,
            &producer(),
            &[policy],
            &CrossModelSources::default(),
        )
        .unwrap();
        assert_eq!(policies[0].target_service(), Some("producer-api"));
        assert_eq!(policies[0].target_app_name(), Some("producer"));
    }

    #[test]
    fn unrelated_endpoints_yield_nothing() {
        let topology = Topology::from_iter([("other", "consumer")]);
        let policies = build_mesh_policies(
            &topology,
            &producer(),
            &[data_policy()],
            &CrossModelSources::default(),
        )
        .unwrap();
        assert!(policies.is_empty());
    }

    #[test]
    fn topology_wire_format() {
        let topology: Topology =
            serde_json::from_str(r#"{"data": ["b", "a"], "metrics": []}"#).unwrap();
        assert_eq!(topology.related_apps("data").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(topology.related_apps("metrics").count(), 0);
        assert_eq!(topology.related_apps("missing").count(), 0);
    }
}
