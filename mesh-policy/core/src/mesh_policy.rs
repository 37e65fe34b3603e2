//! Fully-resolved, mesh-agnostic policies.
//!
//! A [`MeshPolicy`] describes one allowed flow of traffic from a source application to a
//! target. It is also the record published to the mesh provider, so its JSON form is a
//! wire format shared with other implementations.

use crate::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a policy targets an application's service or its workloads.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTargetType {
    #[default]
    App,
    Unit,
}

/// The raw, unvalidated fields of a [`MeshPolicy`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPolicyFields {
    pub source_namespace: String,
    pub source_app_name: String,
    pub target_namespace: String,
    #[serde(default)]
    pub target_app_name: Option<String>,
    #[serde(default)]
    pub target_selector_labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub target_service: Option<String>,
    #[serde(default)]
    pub target_type: PolicyTargetType,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// A validated policy.
///
/// Instances can only be obtained through validation, so every `MeshPolicy` satisfies:
///
/// - app-targeted policies name a target application or service and carry no selector
///   labels;
/// - unit-targeted policies carry no target service and do not set both a target
///   application and selector labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MeshPolicyFields", into = "MeshPolicyFields")]
pub struct MeshPolicy(MeshPolicyFields);

/// A [`MeshPolicy`] could not be constructed from its fields.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {target_type:?} policy from {src_namespace}/{src_app} to namespace {target_namespace}: {violation}")]
pub struct InvalidPolicy {
    pub violation: Violation,
    pub target_type: PolicyTargetType,
    pub src_namespace: String,
    pub src_app: String,
    pub target_namespace: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("neither target_app_name nor target_service specified")]
    MissingAppTarget,

    #[error("target_selector_labels are not supported")]
    AppSelectorLabels,

    #[error("cannot specify both target_app_name and target_selector_labels")]
    AmbiguousUnitTarget,

    #[error("target_service is not supported")]
    UnitService,
}

// === impl MeshPolicy ===

impl MeshPolicy {
    pub fn new(fields: MeshPolicyFields) -> Result<Self, InvalidPolicy> {
        fn named(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|s| !s.is_empty())
        }

        let has_labels = fields
            .target_selector_labels
            .as_ref()
            .is_some_and(|l| !l.is_empty());

        let violation = match fields.target_type {
            PolicyTargetType::App
                if !named(&fields.target_app_name) && !named(&fields.target_service) =>
            {
                Violation::MissingAppTarget
            }
            PolicyTargetType::App if has_labels => Violation::AppSelectorLabels,
            PolicyTargetType::Unit if named(&fields.target_app_name) && has_labels => {
                Violation::AmbiguousUnitTarget
            }
            PolicyTargetType::Unit if named(&fields.target_service) => Violation::UnitService,
            _ => return Ok(Self(fields)),
        };

        Err(InvalidPolicy {
            violation,
            target_type: fields.target_type,
            src_namespace: fields.source_namespace,
            src_app: fields.source_app_name,
            target_namespace: fields.target_namespace,
        })
    }

    pub fn source_namespace(&self) -> &str {
        &self.0.source_namespace
    }

    pub fn source_app_name(&self) -> &str {
        &self.0.source_app_name
    }

    pub fn target_namespace(&self) -> &str {
        &self.0.target_namespace
    }

    /// Empty names are treated as unset.
    pub fn target_app_name(&self) -> Option<&str> {
        self.0.target_app_name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn target_selector_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.0.target_selector_labels.as_ref().filter(|l| !l.is_empty())
    }

    pub fn target_service(&self) -> Option<&str> {
        self.0.target_service.as_deref().filter(|s| !s.is_empty())
    }

    pub fn target_type(&self) -> PolicyTargetType {
        self.0.target_type
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.0.endpoints
    }

    pub fn fields(&self) -> &MeshPolicyFields {
        &self.0
    }
}

impl TryFrom<MeshPolicyFields> for MeshPolicy {
    type Error = InvalidPolicy;

    fn try_from(fields: MeshPolicyFields) -> Result<Self, Self::Error> {
        Self::new(fields)
    }
}

impl From<MeshPolicy> for MeshPolicyFields {
    fn from(policy: MeshPolicy) -> Self {
        policy.0
    }
}
