use crate::Endpoint;
use serde::{Deserialize, Serialize};

/// Access rules declared for the applications related over one relation endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Policy {
    /// Grants access to the application's service.
    App(AppPolicy),

    /// Grants access to the application's workloads directly.
    Unit(UnitPolicy),
}

/// Application-scoped access rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPolicy {
    pub relation: String,
    pub endpoints: Vec<Endpoint>,

    /// The service that is reached. Defaults to the application's name.
    #[serde(default)]
    pub service: Option<String>,
}

/// Workload-scoped access rules.
///
/// Only ports can be constrained below the service boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPolicy {
    pub relation: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

// === impl Policy ===

impl Policy {
    /// The name of the local relation endpoint this policy is attached to.
    pub fn relation(&self) -> &str {
        match self {
            Self::App(p) => &p.relation,
            Self::Unit(p) => &p.relation,
        }
    }
}

impl From<AppPolicy> for Policy {
    fn from(policy: AppPolicy) -> Self {
        Self::App(policy)
    }
}

impl From<UnitPolicy> for Policy {
    fn from(policy: UnitPolicy) -> Self {
        Self::Unit(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    #[test]
    fn tagged_wire_format() {
        let policies: Vec<Policy> = serde_json::from_str(
            r#"[
                {"type": "app", "relation": "data", "endpoints": [{"ports": [8080], "methods": ["GET"]}]},
                {"type": "unit", "relation": "peers", "ports": [9000]}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            policies,
            vec![
                Policy::App(AppPolicy {
                    relation: "data".to_string(),
                    endpoints: vec![Endpoint {
                        ports: Some(vec![8080]),
                        methods: Some(vec![Method::Get]),
                        ..Endpoint::default()
                    }],
                    service: None,
                }),
                Policy::Unit(UnitPolicy {
                    relation: "peers".to_string(),
                    ports: vec![9000],
                }),
            ]
        );
        assert_eq!(policies[1].relation(), "peers");
    }

    #[test]
    fn unit_policy_has_no_l7_fields() {
        let policy: Policy =
            serde_json::from_str(r#"{"type": "unit", "relation": "r", "methods": ["GET"]}"#)
                .unwrap();
        assert_eq!(
            policy,
            Policy::Unit(UnitPolicy {
                relation: "r".to_string(),
                ports: vec![],
            })
        );
    }
}
