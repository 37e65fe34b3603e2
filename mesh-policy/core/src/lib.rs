#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod build;
mod endpoint;
pub mod mesh_policy;
pub mod name;
mod policy;
pub mod relation;

pub use self::{
    build::{build_mesh_policies, AppIdentity, CrossModelSources, ResolveSource, Topology},
    endpoint::{Endpoint, InvalidMethod, Method},
    mesh_policy::{InvalidPolicy, MeshPolicy, MeshPolicyFields, PolicyTargetType, Violation},
    policy::{AppPolicy, Policy, UnitPolicy},
    relation::{CmrData, DatabagError, MeshType, ProviderAppData},
};

/// Label key identifying a workload's application.
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
