//! Translates policies into Istio `AuthorizationPolicy` resources.
//!
//! App-targeted policies attach to the target's `Service` via `targetRefs` so that L7
//! attributes (methods, paths, hosts) can be enforced. Unit-targeted policies select the
//! target's pods directly and can only constrain ports.

use crate::{Translate, TranslateError};
use mesh_policy_core::{
    name::policy_name, AppIdentity, Endpoint, MeshPolicy, PolicyTargetType, APP_NAME_LABEL,
};
use mesh_policy_k8s_api::{
    istio::{
        AuthorizationPolicy, AuthorizationPolicySpec, Operation, PolicyTargetReference, Rule,
        RuleFrom, RuleTo, Source, WorkloadSelector,
    },
    ApiResource, DynamicObject, ObjectMeta,
};
use std::collections::BTreeMap;
use tracing::{error, info};

pub const DEFAULT_TRUST_DOMAIN: &str = "cluster.local";

#[derive(Clone, Debug)]
pub struct IstioTranslator {
    trust_domain: String,
}

/// Returns the peer identity of a service account, in the form Istio expects for
/// `principals`.
pub fn peer_identity(trust_domain: &str, namespace: &str, service_account: &str) -> String {
    format!("{trust_domain}/ns/{namespace}/sa/{service_account}")
}

// === impl IstioTranslator ===

impl Default for IstioTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_TRUST_DOMAIN)
    }
}

impl IstioTranslator {
    pub fn new(trust_domain: impl Into<String>) -> Self {
        Self {
            trust_domain: trust_domain.into(),
        }
    }

    /// Builds one `AuthorizationPolicy` per representable policy.
    pub fn authorization_policies(
        &self,
        requester: &AppIdentity,
        policies: &[MeshPolicy],
    ) -> Vec<AuthorizationPolicy> {
        policies
            .iter()
            .filter_map(|policy| {
                let spec = match policy.target_type() {
                    PolicyTargetType::Unit => self.unit_spec(policy)?,
                    PolicyTargetType::App => self.app_spec(policy),
                };
                Some(AuthorizationPolicy {
                    metadata: ObjectMeta {
                        name: Some(policy_name(
                            &requester.app_name,
                            &requester.namespace,
                            policy,
                        )),
                        namespace: Some(policy.target_namespace().to_string()),
                        ..ObjectMeta::default()
                    },
                    spec,
                })
            })
            .collect()
    }

    /// Workload-level policies select the target's pods and restrict only by port.
    fn unit_spec(&self, policy: &MeshPolicy) -> Option<AuthorizationPolicySpec> {
        if policy.endpoints().iter().any(Endpoint::has_l7_attributes) {
            error!(
                source.namespace = %policy.source_namespace(),
                source.app = %policy.source_app_name(),
                target.namespace = %policy.target_namespace(),
                target.app = ?policy.target_app_name(),
                "Unit policy is not created as it contains disallowed attributes; \
                 unit policies for Istio cannot constrain paths, methods, or hosts",
            );
            return None;
        }

        let selector = match (policy.target_selector_labels(), policy.target_app_name()) {
            (Some(labels), _) if !labels.is_empty() => Some(WorkloadSelector {
                match_labels: labels.clone(),
            }),
            (_, Some(app)) => Some(WorkloadSelector {
                match_labels: BTreeMap::from([(APP_NAME_LABEL.to_string(), app.to_string())]),
            }),
            _ => None,
        };

        let to = policy
            .endpoints()
            .iter()
            .map(|ep| RuleTo {
                operation: Operation {
                    ports: ports(ep),
                    ..Operation::default()
                },
            })
            .collect();

        Some(AuthorizationPolicySpec {
            selector,
            rules: vec![Rule {
                from: vec![self.from(policy)],
                to,
            }],
            ..AuthorizationPolicySpec::default()
        })
    }

    /// Service-level policies attach to the target service and may restrict L7 attributes.
    fn app_spec(&self, policy: &MeshPolicy) -> AuthorizationPolicySpec {
        let target_service = match (policy.target_service(), policy.target_app_name()) {
            (Some(service), Some(app)) => {
                info!(
                    %app,
                    %service,
                    "Policy names both a target service and application; using the service",
                );
                service
            }
            (Some(service), None) => service,
            (None, app) => {
                info!(
                    app = ?app,
                    "Policy has no target service; defaulting to the application name",
                );
                app.unwrap_or_default()
            }
        };

        let to = policy
            .endpoints()
            .iter()
            .map(|ep| RuleTo {
                operation: Operation {
                    ports: ports(ep),
                    hosts: ep.hosts.clone().unwrap_or_default(),
                    methods: ep
                        .methods
                        .iter()
                        .flatten()
                        .map(|m| m.as_str().to_string())
                        .collect(),
                    paths: ep.paths.clone().unwrap_or_default(),
                },
            })
            .collect();

        AuthorizationPolicySpec {
            target_refs: vec![PolicyTargetReference::service(target_service)],
            rules: vec![Rule {
                from: vec![self.from(policy)],
                to,
            }],
            ..AuthorizationPolicySpec::default()
        }
    }

    /// Applications run as a service account of the same name in their namespace.
    fn from(&self, policy: &MeshPolicy) -> RuleFrom {
        RuleFrom {
            source: Source {
                principals: vec![peer_identity(
                    &self.trust_domain,
                    policy.source_namespace(),
                    policy.source_app_name(),
                )],
                ..Source::default()
            },
        }
    }
}

impl Translate for IstioTranslator {
    fn resource_types(&self) -> Vec<ApiResource> {
        vec![ApiResource::erase::<AuthorizationPolicy>(&())]
    }

    fn build(
        &self,
        requester: &AppIdentity,
        policies: &[MeshPolicy],
    ) -> Result<Vec<DynamicObject>, TranslateError> {
        self.authorization_policies(requester, policies)
            .into_iter()
            .map(|ap| {
                let encode = |source| TranslateError::Encode {
                    kind: "AuthorizationPolicy",
                    namespace: ap.metadata.namespace.clone().unwrap_or_default(),
                    name: ap.metadata.name.clone().unwrap_or_default(),
                    source,
                };
                let value = serde_json::to_value(&ap).map_err(encode)?;
                serde_json::from_value(value).map_err(encode)
            })
            .collect()
    }
}

/// The wire format carries ports as strings.
fn ports(ep: &Endpoint) -> Vec<String> {
    ep.ports.iter().flatten().map(u16::to_string).collect()
}
