//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use const_addrs::{ip, net};
use holo_lisp::ddt::{self, DELEGATION_HOLE_TTL, NODE_REFERRAL_TTL};
use holo_lisp::packet::{
    EidPrefix, LocatorFlags, MapRequest, ReferralAction, ReferralRecord,
};

use super::topology;

fn assert_not_authoritative(record: &ReferralRecord, eid_prefix: EidPrefix) {
    assert_eq!(record.action, ReferralAction::NotAuthoritative);
    assert_eq!(record.ttl, 0);
    assert!(record.incomplete);
    assert!(!record.authoritative);
    assert!(record.locators.is_empty());
    assert_eq!(record.eid_prefix, eid_prefix);
}

#[test]
fn test_not_authoritative() {
    let (_, trees) = topology();
    for eid_prefix in [
        // No covering node.
        EidPrefix::new(None, net!("8.8.8.0/24")),
        EidPrefix::new(None, net!("0.0.0.0/0")),
        EidPrefix::new(None, net!("2001:db8::/32")),
        // Unknown instance.
        EidPrefix::new(Some(5), net!("37.77.56.32/31")),
        // Covered by an origin node only.
        EidPrefix::new(None, net!("100.64.1.0/24")),
    ] {
        let record = ddt::referral_record(&trees, &eid_prefix);
        assert_not_authoritative(&record, eid_prefix);
    }
}

#[test]
fn test_delegation_hole() {
    let (_, trees) = topology();
    for eid_prefix in [
        EidPrefix::new(None, net!("37.77.57.0/30")),
        EidPrefix::new(None, net!("37.77.56.0/21")),
        EidPrefix::new(Some(100), net!("2001:db8:2::/48")),
    ] {
        let record = ddt::referral_record(&trees, &eid_prefix);
        assert_eq!(record.action, ReferralAction::DelegationHole);
        assert_eq!(record.ttl, DELEGATION_HOLE_TTL);
        assert_eq!(record.ttl, 15);
        assert!(record.authoritative);
        assert!(!record.incomplete);
        assert!(record.locators.is_empty());
        assert_eq!(record.eid_prefix, eid_prefix);
    }
}

#[test]
fn test_node_referral() {
    let (_, trees) = topology();
    let eid_prefix = EidPrefix::new(None, net!("10.1.2.0/24"));
    let record = ddt::referral_record(&trees, &eid_prefix);

    assert_eq!(record.action, ReferralAction::NodeReferral);
    assert_eq!(record.ttl, NODE_REFERRAL_TTL);
    assert_eq!(record.ttl, 1440);
    assert!(record.authoritative);
    assert!(!record.incomplete);
    assert_eq!(record.eid_prefix, eid_prefix);

    let delegates = record
        .locators
        .iter()
        .map(|locator| locator.address)
        .collect::<BTreeSet<_>>();
    assert_eq!(
        delegates,
        BTreeSet::from([ip!("192.0.2.10"), ip!("192.0.2.11")])
    );
    for locator in &record.locators {
        assert_eq!(locator.priority, 0);
        assert_eq!(locator.weight, 0);
        assert_eq!(locator.m_priority, 0);
        assert_eq!(locator.m_weight, 0);
        assert_eq!(locator.flags, LocatorFlags::REACHABLE);
    }
}

#[test]
fn test_more_specifics_not_authoritative() {
    // A prefix covering several nodes can't be classified.
    let (_, trees) = topology();
    let eid_prefix = EidPrefix::new(None, net!("0.0.0.0/1"));
    let record = ddt::referral_record(&trees, &eid_prefix);
    assert_not_authoritative(&record, eid_prefix);
}

#[test]
fn test_map_referral() {
    let (_, trees) = topology();
    let eid_prefix = EidPrefix::new(None, net!("37.77.57.0/30"));
    let request = MapRequest {
        nonce: 0xfeedface,
        itr_rlocs: vec![ip!("192.0.2.50")],
        eid_prefixes: vec![eid_prefix],
        ..Default::default()
    };

    let referral = ddt::map_referral(&trees, &request).unwrap();
    assert_eq!(referral.nonce, 0xfeedface);
    assert_eq!(referral.records.len(), 1);
    assert_eq!(referral.records[0].action, ReferralAction::DelegationHole);
    assert_eq!(referral.records[0].eid_prefix, eid_prefix);
}

#[test]
fn test_map_referral_no_eid() {
    let (_, trees) = topology();
    let request = MapRequest::default();
    assert!(ddt::map_referral(&trees, &request).is_none());
}
