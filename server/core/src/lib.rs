#![forbid(unsafe_code)]

mod error;
pub mod permissions;
pub mod slug;
pub mod time;
pub mod user;
pub mod variable;

pub use self::{
    error::Error,
    permissions::{Permissions, PluginPermission, ResourcePermission},
    time::TimeRange,
    user::User,
    variable::Variable,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
