use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// An HTTP request method.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

/// Describes a set of requests that a policy allows.
///
/// Every attribute is optional. An unset (or empty) attribute does not constrain
/// the matched traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub methods: Option<Vec<Method>>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

// === impl Method ===

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid HTTP method: {0}")]
pub struct InvalidMethod(String);

impl FromStr for Method {
    type Err = InvalidMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(Self::Connect),
            "DELETE" => Ok(Self::Delete),
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH" => Ok(Self::Patch),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "TRACE" => Ok(Self::Trace),
            _ => Err(InvalidMethod(s.to_string())),
        }
    }
}

// === impl Endpoint ===

impl Endpoint {
    /// An endpoint constrained only by port.
    pub fn ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: Some(ports.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Indicates whether the endpoint constrains hosts, methods, or paths.
    pub fn has_l7_attributes(&self) -> bool {
        fn set<T>(v: &Option<Vec<T>>) -> bool {
            v.as_ref().is_some_and(|v| !v.is_empty())
        }

        set(&self.methods) || set(&self.paths) || set(&self.hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_wire_format() {
        let methods: Vec<Method> = serde_json::from_str(r#"["GET", "POST"]"#).unwrap();
        assert_eq!(methods, vec![Method::Get, Method::Post]);
        assert_eq!(
            serde_json::to_string(&Method::Options).unwrap(),
            r#""OPTIONS""#
        );
        assert_eq!("delete".parse::<Method>().unwrap(), Method::Delete);
        assert!("FETCH".parse::<Method>().is_err());
    }

    #[test]
    fn l7_attributes() {
        assert!(!Endpoint::default().has_l7_attributes());
        assert!(!Endpoint::ports([80]).has_l7_attributes());
        assert!(!Endpoint {
            paths: Some(vec![]),
            ..Endpoint::default()
        }
        .has_l7_attributes());
        assert!(Endpoint {
            paths: Some(vec!["/x".to_string()]),
            ..Endpoint::ports([80])
        }
        .has_l7_attributes());
        assert!(Endpoint {
            hosts: Some(vec!["example.com".to_string()]),
            ..Endpoint::default()
        }
        .has_l7_attributes());
    }

    #[test]
    fn endpoint_fields_are_optional() {
        let ep: Endpoint = serde_json::from_str(r#"{"ports": [8080]}"#).unwrap();
        assert_eq!(ep, Endpoint::ports([8080]));
    }
}
