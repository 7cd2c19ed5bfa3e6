#![forbid(unsafe_code)]

//! The cluster registry and per-cluster Kubernetes access layer.
//!
//! Every cluster is loaded from a provider at startup and never destroyed.
//! The registry owns all cluster clients and is the only way the rest of
//! the aggregator touches the Kubernetes API.

mod client;
mod crds;
mod provider;
mod registry;

pub use self::{
    client::Cluster,
    crds::{Crd, CrdColumn},
    provider::{InClusterConfig, KubeconfigConfig, ProviderConfig},
    registry::{Registry, ResourceList},
};
