//! Ore v2 API client
//!
//! [`OreSession`] holds one authenticated session and runs every domain
//! request through the re-authentication protocol. [`SessionRegistry`] shares
//! one session per endpoint across the process, and [`OreDeployment`] wraps
//! both behind a blocking interface with its own worker pool.
pub mod deployment;
pub mod registry;
pub mod session;

pub use deployment::{OreDeployment, PublishRequest};
pub use registry::SessionRegistry;
pub use session::{api_url, OreSession};
