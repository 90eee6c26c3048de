pub mod core;
pub mod ore;

pub use crate::core::{
    config::{ConfigError, OreConfig},
    errors::OreError,
    kernel::OreResponse,
    types::*,
};
pub use crate::ore::{OreDeployment, OreSession, PublishRequest, SessionRegistry};
