//! Peer directory: the master and member address lists a node broadcasts to.
//!
//! Membership itself is a transport-level concern; consensus only consumes
//! the current peer-set size for its quorum arithmetic.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Permission level of a node. Only masters may propose blocks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Member,
}

impl NodeRole {
    pub fn parse(s: &str) -> Option<NodeRole> {
        match s {
            "master" => Some(NodeRole::Master),
            "member" => Some(NodeRole::Member),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Member => write!(f, "member"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterError {
    pub reason: String,
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid register request: {}", self.reason)
    }
}

impl std::error::Error for RegisterError {}

#[derive(Default)]
struct PeerLists {
    masters: Vec<String>,
    members: Vec<String>,
}

/// Known peers of this node, split by role. The lists exclude this node
/// itself, except for a lone bootstrap master which registers its own
/// address so that its validation broadcast loops back to it.
pub struct PeerDirectory {
    self_address: String,
    lists: RwLock<PeerLists>,
}

impl PeerDirectory {
    pub fn new(self_address: &str) -> Self {
        PeerDirectory {
            self_address: self_address.to_string(),
            lists: RwLock::new(PeerLists::default()),
        }
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Adds a peer. Rejects duplicates, this node's own address and empty
    /// addresses so that repeated broadcasts cannot inflate the quorum base.
    pub fn register(&self, address: &str, role: NodeRole) -> Result<(), RegisterError> {
        if address.trim().is_empty() {
            return Err(RegisterError {
                reason: "address must not be empty".to_string(),
            });
        }
        if address == self.self_address {
            return Err(RegisterError {
                reason: format!("{} is this node's own address", address),
            });
        }
        let mut lists = self.lists.write();
        if lists.masters.iter().any(|a| a == address)
            || lists.members.iter().any(|a| a == address)
        {
            return Err(RegisterError {
                reason: format!("{} is already registered", address),
            });
        }
        match role {
            NodeRole::Master => lists.masters.push(address.to_string()),
            NodeRole::Member => lists.members.push(address.to_string()),
        }
        Ok(())
    }

    /// Bootstrap-only: a lone master lists itself so its own broadcast
    /// reaches it and quorum(1) = 1 lets it self-accept.
    pub fn register_self_master(&self) {
        let mut lists = self.lists.write();
        if !lists.masters.iter().any(|a| a == &self.self_address) {
            let addr = self.self_address.clone();
            lists.masters.push(addr);
        }
    }

    /// Replaces both lists, used when joining an existing network.
    pub fn adopt(&self, masters: Vec<String>, members: Vec<String>) {
        let mut lists = self.lists.write();
        lists.masters = masters;
        lists.members = members;
    }

    /// Removes `address` from whichever list holds it.
    pub fn deregister(&self, address: &str) -> bool {
        let mut lists = self.lists.write();
        let before = lists.masters.len() + lists.members.len();
        lists.masters.retain(|a| a != address);
        lists.members.retain(|a| a != address);
        before != lists.masters.len() + lists.members.len()
    }

    /// Peer-set size the quorum is computed over.
    pub fn total(&self) -> usize {
        let lists = self.lists.read();
        lists.masters.len() + lists.members.len()
    }

    pub fn masters(&self) -> Vec<String> {
        self.lists.read().masters.clone()
    }

    pub fn members(&self) -> Vec<String> {
        self.lists.read().members.clone()
    }

    /// Every known peer address, masters first.
    pub fn all(&self) -> Vec<String> {
        let lists = self.lists.read();
        lists
            .masters
            .iter()
            .chain(lists.members.iter())
            .cloned()
            .collect()
    }
}
