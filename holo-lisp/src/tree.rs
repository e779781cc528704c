//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use holo_utils::ip::{AddressFamily, IpNetworkExt};
use ipnetwork::IpNetwork;

use crate::etr::OriginNode;
use crate::map_server::MapServerNode;

// Routing instance, with one address tree per address family.
#[derive(Debug)]
pub struct InstanceTree {
    pub instance_id: u32,
    pub ipv4: Node,
    pub ipv6: Node,
}

// Node of the address tree.
//
// Children of a container never overlap each other, and are always contained
// within the prefix of their parent.
#[derive(Debug)]
pub struct Node {
    pub prefix: IpNetwork,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub enum NodeKind {
    Container(Children),
    // Container for which we are authoritative. Other DDT nodes sharing the
    // same authority may be listed.
    AuthContainer(Children, BTreeSet<IpAddr>),
    // Delegation to other DDT nodes.
    DelegationReferral(BTreeSet<IpAddr>),
    MapServer(MapServerNode),
    Origin(OriginNode),
}

pub type Children = BTreeMap<IpNetwork, Node>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TreeError {
    NotAuthoritative(IpNetwork, IpNetwork),
    NotContainer(IpNetwork),
    Overlap(IpNetwork, IpNetwork),
    MoreSpecificsFound(IpNetwork),
    UnknownInstance(u32),
}

// ===== impl InstanceTree =====

impl InstanceTree {
    pub fn new(instance_id: u32) -> InstanceTree {
        InstanceTree {
            instance_id,
            ipv4: Node::container(IpNetwork::default_route(
                AddressFamily::Ipv4,
            )),
            ipv6: Node::container(IpNetwork::default_route(
                AddressFamily::Ipv6,
            )),
        }
    }

    pub fn root(&self, af: AddressFamily) -> &Node {
        match af {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    pub fn root_mut(&mut self, af: AddressFamily) -> &mut Node {
        match af {
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    pub fn roots(&self) -> [&Node; 2] {
        [&self.ipv4, &self.ipv6]
    }

    pub fn roots_mut(&mut self) -> [&mut Node; 2] {
        [&mut self.ipv4, &mut self.ipv6]
    }
}

// ===== impl Node =====

impl Node {
    pub fn new(prefix: IpNetwork, kind: NodeKind) -> Node {
        Node {
            prefix: prefix.apply_mask(),
            kind,
        }
    }

    pub fn container(prefix: IpNetwork) -> Node {
        Node::new(prefix, NodeKind::Container(Default::default()))
    }

    pub fn auth_container(
        prefix: IpNetwork,
        peers: impl IntoIterator<Item = IpAddr>,
    ) -> Node {
        let peers = peers.into_iter().collect();
        Node::new(prefix, NodeKind::AuthContainer(Default::default(), peers))
    }

    pub fn delegation_referral(
        prefix: IpNetwork,
        delegates: impl IntoIterator<Item = IpAddr>,
    ) -> Node {
        let delegates = delegates.into_iter().collect();
        Node::new(prefix, NodeKind::DelegationReferral(delegates))
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Container(..) | NodeKind::AuthContainer(..)
        )
    }

    pub fn children(&self) -> Option<&Children> {
        match &self.kind {
            NodeKind::Container(children)
            | NodeKind::AuthContainer(children, _) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Children> {
        match &mut self.kind {
            NodeKind::Container(children)
            | NodeKind::AuthContainer(children, _) => Some(children),
            _ => None,
        }
    }

    // Returns an iterator over the node's children.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.children().into_iter().flat_map(|children| children.values())
    }

    // Returns an iterator over this node and all of its descendants, in
    // depth-first order.
    pub fn iter_subtree(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        Box::new(
            std::iter::once(self)
                .chain(self.iter().flat_map(|child| child.iter_subtree())),
        )
    }

    // Calls the provided closure for this node and all of its descendants, in
    // depth-first order.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Node)) {
        f(self);
        if let Some(children) = self.children_mut() {
            for child in children.values_mut() {
                child.for_each_mut(f);
            }
        }
    }

    // Adds a child node, returning the child it replaced, if any.
    //
    // A child whose prefix is equal to the prefix of an existing child
    // replaces it. Partial overlaps are rejected.
    pub fn add(&mut self, node: Node) -> Result<Option<Node>, TreeError> {
        self.check_authoritative(&node.prefix)?;
        let self_prefix = self.prefix;
        let children = self
            .children_mut()
            .ok_or(TreeError::NotContainer(self_prefix))?;

        if let Some(child) = children.values().find(|child| {
            child.prefix != node.prefix && child.prefix.overlaps(&node.prefix)
        }) {
            return Err(TreeError::Overlap(node.prefix, child.prefix));
        }

        Ok(children.insert(node.prefix, node))
    }

    // Removes the child with the given prefix.
    pub fn remove(&mut self, prefix: &IpNetwork) -> Option<Node> {
        let prefix = prefix.apply_mask();
        self.children_mut()?.remove(&prefix)
    }

    // Returns all children that overlap with the given prefix.
    pub fn find_all(
        &self,
        prefix: &IpNetwork,
    ) -> Result<Vec<&Node>, TreeError> {
        self.check_authoritative(prefix)?;
        let matches = self
            .iter()
            .filter(|child| child.prefix.overlaps(prefix))
            .collect();
        Ok(matches)
    }

    // Returns the child whose prefix is equal to the given prefix.
    pub fn find_exact(&self, prefix: &IpNetwork) -> Option<&Node> {
        let prefix = prefix.apply_mask();
        self.children()?.get(&prefix)
    }

    pub fn find_exact_mut(
        &mut self,
        prefix: &IpNetwork,
    ) -> Option<&mut Node> {
        let prefix = prefix.apply_mask();
        self.children_mut()?.get_mut(&prefix)
    }

    // Returns the nodes visited while resolving the given prefix, from the
    // most specific match up to and including this node.
    pub fn resolve_path(
        &self,
        prefix: &IpNetwork,
    ) -> Result<Vec<&Node>, TreeError> {
        let Some(child) = self.find_one(prefix)? else {
            return Ok(vec![self]);
        };

        let mut path = if child.is_container() {
            child.resolve_path(prefix)?
        } else {
            vec![child]
        };
        path.push(self);
        Ok(path)
    }

    // Returns the most specific node covering the given prefix.
    pub fn resolve(&self, prefix: &IpNetwork) -> Result<&Node, TreeError> {
        let path = self.resolve_path(prefix)?;
        Ok(path[0])
    }

    // Mutable counterpart of `resolve`.
    pub fn resolve_mut(
        &mut self,
        prefix: &IpNetwork,
    ) -> Result<&mut Node, TreeError> {
        let Some(child_prefix) =
            self.find_one(prefix)?.map(|child| child.prefix)
        else {
            return Ok(self);
        };

        let child = self
            .find_exact_mut(&child_prefix)
            .ok_or(TreeError::NotContainer(child_prefix))?;
        if child.is_container() {
            child.resolve_mut(prefix)
        } else {
            Ok(child)
        }
    }

    // Returns the only child covering the given prefix, if any.
    fn find_one(
        &self,
        prefix: &IpNetwork,
    ) -> Result<Option<&Node>, TreeError> {
        let mut matches = self.find_all(prefix)?;
        if matches.len() > 1 {
            return Err(TreeError::MoreSpecificsFound(*prefix));
        }
        Ok(matches
            .pop()
            .filter(|child| child.prefix.contains_prefix(prefix)))
    }

    fn check_authoritative(
        &self,
        prefix: &IpNetwork,
    ) -> Result<(), TreeError> {
        if !self.prefix.contains_prefix(prefix) {
            return Err(TreeError::NotAuthoritative(self.prefix, *prefix));
        }
        Ok(())
    }
}

// ===== impl NodeKind =====

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Container(..) => "container",
            NodeKind::AuthContainer(..) => "auth-container",
            NodeKind::DelegationReferral(..) => "delegation-referral",
            NodeKind::MapServer(..) => "map-server",
            NodeKind::Origin(..) => "origin",
        }
    }
}

// ===== impl TreeError =====

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::NotAuthoritative(node, prefix) => {
                write!(f, "node {} is not authoritative for {}", node, prefix)
            }
            TreeError::NotContainer(node) => {
                write!(f, "node {} can't have children", node)
            }
            TreeError::Overlap(prefix, existing) => {
                write!(f, "prefix {} overlaps with {}", prefix, existing)
            }
            TreeError::MoreSpecificsFound(prefix) => {
                write!(f, "found more-specifics for {}", prefix)
            }
            TreeError::UnknownInstance(instance_id) => {
                write!(f, "unknown instance-id {}", instance_id)
            }
        }
    }
}

impl std::error::Error for TreeError {}
