pub mod config;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod host;
pub mod instance;
pub mod link;
pub mod logging;
pub mod origin;
pub mod state;
pub mod walker;

pub use config::{AppConfig, DeployConfig};
pub use driver::{DeployEvent, DeployHandle, DeploySummary, Deployer, EntryReport, Phase};
pub use error::{EntryError, StateError};
pub use fingerprint::{Fingerprint, LinkMode};
pub use host::{Host, HostRoots};
pub use instance::{InstanceHost, InstanceOptions};
pub use link::{LinkAction, Outcome};
pub use state::StateStore;
pub use walker::{RootCategory, VirtualFile, VirtualTreeWalker};
