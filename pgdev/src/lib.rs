#[macro_use]
extern crate async_trait;

pub mod activate;
pub mod builder;
pub mod cluster;
pub mod command;
pub mod config;
pub mod env;
pub mod err;
pub mod kind;
pub mod layout;
pub mod patch;
pub mod source;
pub mod topology;

#[cfg(feature = "cli")]
pub mod cli;


pub use crate::config::{ProvisionConfig, ProvisionConfigBuilder};
pub use crate::err::ProvisionErr;
pub use crate::topology::{Orchestrator, Provisioned};
