//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net};
use holo_lisp::config::{Config, ConfigError, NodeCfg, RejectLogLevel};
use holo_lisp::instance::build_trees;
use holo_lisp::packet::KeyId;
use holo_lisp::tree::TreeError;

use super::TOPOLOGY;

#[test]
fn test_config_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.xtr_id, 0);
    assert_eq!(config.map_notify_probability, 0.1);
    assert_eq!(config.reject_log_level, RejectLogLevel::Warn);
    assert_eq!(config.cleanup_interval, 30);
    assert!(config.instances.is_empty());
}

#[test]
fn test_config_topology() {
    let config = Config::parse(TOPOLOGY).unwrap();
    assert_eq!(config.xtr_id, 0x1234);
    assert_eq!(config.site_id, 1);
    assert_eq!(config.instances.len(), 2);

    let instance = &config.instances[0];
    assert_eq!(instance.instance_id, 0);
    assert_eq!(instance.nodes.len(), 3);

    let NodeCfg::AuthContainer(auth) = &instance.nodes[1] else {
        panic!("unexpected node type");
    };
    assert_eq!(auth.prefix, net!("37.77.56.0/21"));
    let NodeCfg::MapServer(ms) = &auth.children[0] else {
        panic!("unexpected node type");
    };
    assert_eq!(ms.key_id, KeyId::HmacSha1_96);
    assert_eq!(ms.key, "K");
    assert!(ms.allow_more_specifics);
    assert_eq!(ms.registration_lifetime, 180);
    assert_eq!(ms.rtrs, vec![ip!("198.51.100.7")]);

    let NodeCfg::Origin(origin) = &instance.nodes[2] else {
        panic!("unexpected node type");
    };
    assert_eq!(origin.locators.len(), 2);
    assert_eq!(origin.locators[0].priority, 1);
    assert_eq!(origin.locators[0].weight, 100);
    assert_eq!(origin.locators[1].priority, 2);
    assert!(origin.map_servers.is_empty());
}

#[test]
fn test_config_invalid_probability() {
    let error = Config::parse("map_notify_probability = 1.5").unwrap_err();
    assert!(matches!(error, ConfigError::InvalidProbability(_)));
}

#[test]
fn test_config_invalid_cleanup_interval() {
    let error = Config::parse("cleanup_interval = 0").unwrap_err();
    assert!(matches!(error, ConfigError::InvalidCleanupInterval));

    let config = Config::parse("cleanup_interval = 1").unwrap();
    assert_eq!(config.cleanup_interval, 1);
}

#[test]
fn test_config_unknown_field() {
    let error = Config::parse("no_such_option = 1").unwrap_err();
    assert!(matches!(error, ConfigError::Parse(_)));
}

#[test]
fn test_config_duplicate_instance() {
    let config = r#"
[[instances]]
instance_id = 5

[[instances]]
instance_id = 5
"#;
    let error = Config::parse(config).unwrap_err();
    assert!(matches!(error, ConfigError::DuplicateInstance(5)));
}

#[test]
fn test_config_overlapping_nodes() {
    let config = r#"
[[instances]]

[[instances.nodes]]
type = "container"
prefix = "10.0.0.0/8"

[[instances.nodes]]
type = "map-server"
prefix = "10.1.0.0/16"
key = "K"
"#;
    let config = Config::parse(config).unwrap();
    let error = build_trees(&config.instances).unwrap_err();
    assert!(matches!(error, ConfigError::Tree(0, TreeError::Overlap(..))));
}

#[test]
fn test_config_child_outside_parent() {
    let config = r#"
[[instances]]

[[instances.nodes]]
type = "auth-container"
prefix = "10.0.0.0/8"

[[instances.nodes.children]]
type = "map-server"
prefix = "11.0.0.0/16"
key = "K"
"#;
    let config = Config::parse(config).unwrap();
    let error = build_trees(&config.instances).unwrap_err();
    assert!(matches!(
        error,
        ConfigError::Tree(0, TreeError::NotAuthoritative(..))
    ));
}
