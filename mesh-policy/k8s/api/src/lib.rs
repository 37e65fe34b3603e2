#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod istio;
pub mod labels;

pub use self::labels::{Labels, Selector};
pub use k8s_openapi::{
    api::{
        apps::v1::StatefulSet,
        core::v1::{ConfigMap, Service},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::{ErrorResponse, GroupVersionKind, TypeMeta},
    Client, Error, Resource, ResourceExt,
};
