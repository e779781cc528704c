//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};

use crate::packet::KeyId;
use crate::tree::TreeError;

// LISP mapping node configuration.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // xTR-ID sent in Map-Registers, as a decimal string (128 bits don't fit
    // in a TOML integer).
    #[serde_as(as = "DisplayFromStr")]
    pub xtr_id: u128,
    pub site_id: u64,
    // Probability of requesting a Map-Notify on a periodic registration.
    pub map_notify_probability: f64,
    pub reject_log_level: RejectLogLevel,
    // Map-Server registration cleanup interval, in seconds.
    pub cleanup_interval: u64,
    pub instances: Vec<InstanceCfg>,
}

// Log level used for rejected registrations and Info-Requests.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RejectLogLevel {
    #[default]
    Warn,
    Debug,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceCfg {
    #[serde(default)]
    pub instance_id: u32,
    #[serde(default)]
    pub nodes: Vec<NodeCfg>,
}

// Address tree node configuration.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeCfg {
    Container(ContainerCfg),
    AuthContainer(AuthContainerCfg),
    DelegationReferral(DelegationReferralCfg),
    MapServer(MapServerCfg),
    Origin(OriginCfg),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerCfg {
    pub prefix: IpNetwork,
    #[serde(default)]
    pub children: Vec<NodeCfg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthContainerCfg {
    pub prefix: IpNetwork,
    #[serde(default)]
    pub peers: Vec<IpAddr>,
    #[serde(default)]
    pub children: Vec<NodeCfg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegationReferralCfg {
    pub prefix: IpNetwork,
    pub delegates: Vec<IpAddr>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapServerCfg {
    pub prefix: IpNetwork,
    #[serde(default = "dflt_key_id")]
    pub key_id: KeyId,
    pub key: String,
    #[serde(default = "dflt_allow_more_specifics")]
    pub allow_more_specifics: bool,
    // Registration lifetime, in seconds.
    #[serde(default = "dflt_registration_lifetime")]
    pub registration_lifetime: u64,
    // RTRs advertised in Info-Replies.
    #[serde(default)]
    pub rtrs: Vec<IpAddr>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OriginCfg {
    pub prefix: IpNetwork,
    #[serde(default)]
    pub locators: Vec<LocatorCfg>,
    #[serde(default)]
    pub map_servers: Vec<MapServerPeerCfg>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocatorCfg {
    pub address: IpAddr,
    #[serde(default = "dflt_priority")]
    pub priority: u8,
    #[serde(default = "dflt_weight")]
    pub weight: u8,
    #[serde(default = "dflt_m_priority")]
    pub m_priority: u8,
    #[serde(default)]
    pub m_weight: u8,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MapServerPeerCfg {
    pub address: IpAddr,
    #[serde(default = "dflt_key_id")]
    pub key_id: KeyId,
    pub key: String,
    #[serde(default)]
    pub proxy_map_reply: bool,
    // Unset: use RTRs when behind NAT. `true`: always use RTRs when the
    // Map-Server advertises them. `false`: never use RTRs.
    #[serde(default)]
    pub use_rtr: Option<bool>,
}

// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    InvalidProbability(f64),
    InvalidCleanupInterval,
    DuplicateInstance(u32),
    Tree(u32, TreeError),
}

// ===== impl Config =====

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let config_str =
            std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Config::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.map_notify_probability) {
            return Err(ConfigError::InvalidProbability(
                self.map_notify_probability,
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(ConfigError::InvalidCleanupInterval);
        }

        let mut instance_ids = std::collections::BTreeSet::new();
        for instance in &self.instances {
            if !instance_ids.insert(instance.instance_id) {
                return Err(ConfigError::DuplicateInstance(
                    instance.instance_id,
                ));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            xtr_id: 0,
            site_id: 0,
            map_notify_probability: 0.1,
            reject_log_level: Default::default(),
            cleanup_interval: 30,
            instances: vec![],
        }
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(error) => {
                write!(f, "failed to read configuration file: {}", error)
            }
            ConfigError::Parse(error) => {
                write!(f, "failed to parse configuration file: {}", error)
            }
            ConfigError::InvalidProbability(value) => {
                write!(f, "invalid Map-Notify probability: {}", value)
            }
            ConfigError::InvalidCleanupInterval => {
                write!(f, "cleanup interval must be non-zero")
            }
            ConfigError::DuplicateInstance(instance_id) => {
                write!(f, "duplicate instance-id {}", instance_id)
            }
            ConfigError::Tree(instance_id, error) => {
                write!(f, "instance-id {}: {}", instance_id, error)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(error) => Some(error),
            ConfigError::Parse(error) => Some(error),
            ConfigError::Tree(_, error) => Some(error),
            _ => None,
        }
    }
}

// ===== helper functions =====

fn dflt_key_id() -> KeyId {
    KeyId::HmacSha1_96
}

fn dflt_allow_more_specifics() -> bool {
    true
}

fn dflt_registration_lifetime() -> u64 {
    180
}

fn dflt_priority() -> u8 {
    1
}

fn dflt_weight() -> u8 {
    100
}

fn dflt_m_priority() -> u8 {
    255
}
