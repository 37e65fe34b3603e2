//! Codecs for the flat, string-keyed data exchanged between related applications.
//!
//! Every value in a databag is itself a JSON document.

use crate::{CrossModelSources, MeshPolicy};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::error;

/// The data one application publishes on a relation.
pub type Databag = BTreeMap<String, String>;

/// Holds the JSON list of [`MeshPolicy`] records a consumer requests.
pub const POLICIES_KEY: &str = "policies";

/// Holds a [`CmrData`] record on cross-boundary relations.
pub const CMR_DATA_KEY: &str = "cmr_data";

const LABELS_KEY: &str = "labels";
const MESH_TYPE_KEY: &str = "mesh_type";

/// A supported service mesh implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshType {
    Istio,
}

/// What a mesh provider tells its consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAppData {
    /// Labels that subscribe a workload to the mesh.
    pub labels: BTreeMap<String, String>,
    pub mesh_type: MeshType,
}

/// Identifies an application across an isolation boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmrData {
    pub app_name: String,
    #[serde(rename = "juju_model_name")]
    pub namespace: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DatabagError {
    #[error("invalid JSON in databag key {key}: {source}")]
    Json {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("databag is missing key {0}")]
    MissingKey(&'static str),
}

// === impl MeshType ===

impl fmt::Display for MeshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Istio => f.write_str("istio"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mesh type: {0}")]
pub struct UnknownMeshType(String);

impl FromStr for MeshType {
    type Err = UnknownMeshType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "istio" => Ok(Self::Istio),
            _ => Err(UnknownMeshType(s.to_string())),
        }
    }
}

// === impl ProviderAppData ===

impl ProviderAppData {
    pub fn to_databag(&self) -> Result<Databag, DatabagError> {
        Ok(Databag::from([
            (LABELS_KEY.to_string(), encode(LABELS_KEY, &self.labels)?),
            (MESH_TYPE_KEY.to_string(), encode(MESH_TYPE_KEY, &self.mesh_type)?),
        ]))
    }

    /// Decodes a provider's databag, returning `None` if the provider has not yet published
    /// anything.
    pub fn from_databag(databag: &Databag) -> Result<Option<Self>, DatabagError> {
        if databag.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            labels: decode(LABELS_KEY, required(databag, LABELS_KEY)?)?,
            mesh_type: decode(MESH_TYPE_KEY, required(databag, MESH_TYPE_KEY)?)?,
        }))
    }
}

// === impl CmrData ===

impl CmrData {
    pub fn new(app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn to_databag(&self) -> Result<Databag, DatabagError> {
        Ok(Databag::from([(
            CMR_DATA_KEY.to_string(),
            encode(CMR_DATA_KEY, self)?,
        )]))
    }
}

/// Collects identity records from the databags of cross-boundary relations, keyed by the
/// related application's local name.
///
/// Databags that have not published a record are skipped; malformed records are logged and
/// skipped.
pub fn cross_model_sources<'a>(
    databags: impl IntoIterator<Item = (&'a str, &'a Databag)>,
) -> CrossModelSources {
    databags
        .into_iter()
        .filter_map(|(app, databag)| {
            let raw = databag.get(CMR_DATA_KEY)?;
            match decode::<CmrData>(CMR_DATA_KEY, raw) {
                Ok(data) => Some((app.to_string(), data)),
                Err(error) => {
                    error!(%app, %error, "Invalid cross-model data");
                    None
                }
            }
        })
        .collect()
}

/// Encodes policies for publication to the mesh provider.
pub fn encode_policies(policies: &[MeshPolicy]) -> Result<String, DatabagError> {
    encode(POLICIES_KEY, policies)
}

/// Decodes and validates the policies requested by every related consumer.
pub fn decode_policies<'a>(
    databags: impl IntoIterator<Item = &'a Databag>,
) -> Result<Vec<MeshPolicy>, DatabagError> {
    let mut policies = Vec::new();
    for databag in databags {
        if let Some(raw) = databag.get(POLICIES_KEY) {
            policies.extend(decode::<Vec<MeshPolicy>>(POLICIES_KEY, raw)?);
        }
    }
    Ok(policies)
}

fn required<'d>(databag: &'d Databag, key: &'static str) -> Result<&'d str, DatabagError> {
    databag
        .get(key)
        .map(String::as_str)
        .ok_or(DatabagError::MissingKey(key))
}

fn encode<T: Serialize + ?Sized>(key: &'static str, value: &T) -> Result<String, DatabagError> {
    serde_json::to_string(value).map_err(|source| DatabagError::Json { key, source })
}

fn decode<T: for<'de> Deserialize<'de>>(key: &'static str, raw: &str) -> Result<T, DatabagError> {
    serde_json::from_str(raw).map_err(|source| DatabagError::Json { key, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MeshPolicyFields, PolicyTargetType, ResolveSource};
    use maplit::btreemap;

    #[test]
    fn provider_data_roundtrip() {
        let data = ProviderAppData {
            labels: btreemap! {
                "istio.io/dataplane-mode".to_string() => "ambient".to_string(),
            },
            mesh_type: MeshType::Istio,
        };
        let databag = data.to_databag().unwrap();
        assert_eq!(
            databag,
            btreemap! {
                "labels".to_string() => r#"{"istio.io/dataplane-mode":"ambient"}"#.to_string(),
                "mesh_type".to_string() => r#""istio""#.to_string(),
            }
        );
        assert_eq!(ProviderAppData::from_databag(&databag).unwrap(), Some(data));
    }

    #[test]
    fn provider_data_absent_or_partial() {
        assert_eq!(ProviderAppData::from_databag(&Databag::new()).unwrap(), None);

        let partial = btreemap! { "labels".to_string() => "{}".to_string() };
        assert!(matches!(
            ProviderAppData::from_databag(&partial),
            Err(DatabagError::MissingKey("mesh_type"))
        ));

        let unknown = btreemap! {
            "labels".to_string() => "{}".to_string(),
            "mesh_type".to_string() => r#""linkerd""#.to_string(),
        };
        assert!(matches!(
            ProviderAppData::from_databag(&unknown),
            Err(DatabagError::Json { key: "mesh_type", .. })
        ));
    }

    #[test]
    fn cross_model_databags() {
        let good = CmrData::new("consumer", "other-ns").to_databag().unwrap();
        assert_eq!(
            good["cmr_data"],
            r#"{"app_name":"consumer","juju_model_name":"other-ns"}"#
        );
        let bad = btreemap! { "cmr_data".to_string() => "{not json".to_string() };
        let empty = Databag::new();

        let sources = cross_model_sources([("alias", &good), ("broken", &bad), ("pending", &empty)]);
        assert_eq!(sources.get("alias"), Some(&CmrData::new("consumer", "other-ns")));
        assert_eq!(sources.get("broken"), None);
        assert_eq!(sources.get("pending"), None);
        assert_eq!(
            sources.resolve_source_identity("broken", "ns"),
            crate::AppIdentity::new("broken", "ns")
        );
    }

    #[test]
    fn policies_roundtrip() {
        let policy = MeshPolicy::new(MeshPolicyFields {
            source_namespace: "ns".to_string(),
            source_app_name: "consumer".to_string(),
            target_namespace: "ns".to_string(),
            target_app_name: Some("producer".to_string()),
            target_type: PolicyTargetType::App,
            ..MeshPolicyFields::default()
        })
        .unwrap();

        let a = btreemap! {
            POLICIES_KEY.to_string() => encode_policies(&[policy.clone()]).unwrap(),
        };
        let b = btreemap! {
            POLICIES_KEY.to_string() => encode_policies(&[policy.clone(), policy.clone()]).unwrap(),
        };
        let none = Databag::new();
        let decoded = decode_policies([&a, &none, &b]).unwrap();
        assert_eq!(decoded, vec![policy.clone(), policy.clone(), policy]);
    }

    #[test]
    fn decoding_validates_policies() {
        let invalid = btreemap! {
            POLICIES_KEY.to_string() => r#"[{"source_namespace": "a", "source_app_name": "b",
                "target_namespace": "c", "target_type": "unit", "target_service": "svc"}]"#
                .to_string(),
        };
        let err = decode_policies([&invalid]).unwrap_err();
        assert!(err.to_string().contains("target_service"), "{err}");
    }

    #[test]
    fn mesh_type_parsing() {
        assert_eq!("istio".parse::<MeshType>().unwrap(), MeshType::Istio);
        assert!("linkerd".parse::<MeshType>().is_err());
        assert_eq!(MeshType::Istio.to_string(), "istio");
    }
}
