//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::packet::{
    EidPrefix, LocatorFlags, LocatorRecord, MapReferral, MapRequest,
    ReferralAction, ReferralRecord,
};
use crate::tree::{InstanceTree, Node, NodeKind, TreeError};

// TTL of node referrals, in minutes.
pub const NODE_REFERRAL_TTL: u32 = 1440;
// TTL of delegation holes, in minutes.
pub const DELEGATION_HOLE_TTL: u32 = 15;

// ===== global functions =====

// Builds the Map-Referral answering a DDT Map-Request.
//
// Only the first EID prefix of the request is considered. Returns `None` if
// the request has no EID prefix.
pub fn map_referral(
    trees: &BTreeMap<u32, InstanceTree>,
    request: &MapRequest,
) -> Option<MapReferral> {
    let eid_prefix = request.eid_prefixes.first()?;
    let record = referral_record(trees, eid_prefix);
    Some(MapReferral::new(request.nonce, vec![record]))
}

// Classifies the given EID prefix according to our position in the DDT
// hierarchy.
pub fn referral_record(
    trees: &BTreeMap<u32, InstanceTree>,
    eid_prefix: &EidPrefix,
) -> ReferralRecord {
    let path = trees
        .get(&eid_prefix.iid())
        .ok_or(TreeError::UnknownInstance(eid_prefix.iid()))
        .and_then(|tree| {
            tree.root(eid_prefix.address_family())
                .resolve_path(&eid_prefix.prefix)
        });
    let Ok(path) = path else {
        return not_authoritative(eid_prefix);
    };

    // Delegation to other DDT nodes.
    if let NodeKind::DelegationReferral(delegates) = &path[0].kind {
        let locators = delegates
            .iter()
            .map(|addr| {
                LocatorRecord::new(0, 0, 0, 0, LocatorFlags::REACHABLE, *addr)
            })
            .collect();
        return ReferralRecord::new(
            NODE_REFERRAL_TTL,
            ReferralAction::NodeReferral,
            true,
            false,
            0,
            *eid_prefix,
            locators,
        );
    }

    // We are authoritative but nothing was delegated.
    if path.iter().any(|node| is_authoritative(node)) {
        return ReferralRecord::new(
            DELEGATION_HOLE_TTL,
            ReferralAction::DelegationHole,
            true,
            false,
            0,
            *eid_prefix,
            vec![],
        );
    }

    not_authoritative(eid_prefix)
}

// ===== helper functions =====

fn is_authoritative(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::AuthContainer(..) | NodeKind::MapServer(..)
    )
}

fn not_authoritative(eid_prefix: &EidPrefix) -> ReferralRecord {
    ReferralRecord::new(
        0,
        ReferralAction::NotAuthoritative,
        false,
        true,
        0,
        *eid_prefix,
        vec![],
    )
}
