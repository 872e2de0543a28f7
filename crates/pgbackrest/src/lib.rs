//! pgBackRest configuration synthesis
//!
//! Turns the backup section of an `IvoryCluster` into the INI files mounted
//! into database pods and the repository host, plus the commands that use
//! them. Nothing in this crate talks to the API server.

pub mod command;
pub mod config;
pub mod ini;

pub use command::{CONFIG_HASH_MISMATCH, restore_command, stanza_create_command};
pub use config::{
    InstanceTopology, RepoHostTopology, calculate_config_hash, config_map_intent,
    dedicated_repo_host_enabled, instance_config, repo_host_config, repo_log_path,
    repo_options_hash, server_config,
};
pub use ini::{IniMultiSet, IniSectionSet};
