#![forbid(unsafe_code)]

pub mod application;
pub mod team;
pub mod template;
pub mod user;

pub use self::{
    application::{Application, ApplicationSpec, Dependency, Link, PluginBinding, ResourceSelector},
    team::{Team, TeamSpec},
    template::{Template, TemplateSpec},
    user::{User, UserSpec},
};
pub use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
pub use kube::api::{ObjectMeta, ResourceExt};

/// The API group of the kobs custom resources.
pub const GROUP: &str = "kobs.io";
