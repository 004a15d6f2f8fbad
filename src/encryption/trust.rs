//! Trusted peer fingerprints.
//!
//! The set is owned by the host application and shared with every overlay
//! as a [`TrustStore`]. It serialises as a plain list so the host can
//! persist it however it likes; nothing here touches disk.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Shared, injectable trust set.
pub type TrustStore = Arc<RwLock<TrustedPeerSet>>;

/// A verified peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPeer {
    fingerprint: String,
    /// Free-form description, usually the peer name
    #[serde(default)]
    pub description: String,
}

impl TrustedPeer {
    /// Create a record.
    pub fn new(fingerprint: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            description: description.into(),
        }
    }

    /// Hex fingerprint; fixed for the record's lifetime.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Fingerprint-keyed set of trusted peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TrustedPeer>", into = "Vec<TrustedPeer>")]
pub struct TrustedPeerSet {
    peers: HashMap<String, TrustedPeer>,
}

impl TrustedPeerSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into a shareable store.
    pub fn into_store(self) -> TrustStore {
        Arc::new(RwLock::new(self))
    }

    /// Whether `fingerprint` is trusted.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.peers.contains_key(fingerprint)
    }

    /// Record for `fingerprint`.
    pub fn get(&self, fingerprint: &str) -> Option<&TrustedPeer> {
        self.peers.get(fingerprint)
    }

    /// Mutable record for `fingerprint`.
    pub fn get_mut(&mut self, fingerprint: &str) -> Option<&mut TrustedPeer> {
        self.peers.get_mut(fingerprint)
    }

    /// Insert or replace a record.
    pub fn add(&mut self, peer: TrustedPeer) {
        self.peers.insert(peer.fingerprint.clone(), peer);
    }

    /// Remove a record, returning it.
    pub fn remove(&mut self, fingerprint: &str) -> Option<TrustedPeer> {
        self.peers.remove(fingerprint)
    }

    /// Add every record from `peers`.
    pub fn update(&mut self, peers: impl IntoIterator<Item = TrustedPeer>) {
        for peer in peers {
            self.add(peer);
        }
    }

    /// Iterate records.
    pub fn iter(&self) -> impl Iterator<Item = &TrustedPeer> {
        self.peers.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl From<Vec<TrustedPeer>> for TrustedPeerSet {
    fn from(peers: Vec<TrustedPeer>) -> Self {
        let mut set = Self::new();
        set.update(peers);
        set
    }
}

impl From<TrustedPeerSet> for Vec<TrustedPeer> {
    fn from(set: TrustedPeerSet) -> Self {
        let mut peers: Vec<TrustedPeer> = set.peers.into_values().collect();
        peers.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_replaces_by_fingerprint() {
        let mut set = TrustedPeerSet::new();
        set.add(TrustedPeer::new("aa11", "Alice"));
        set.add(TrustedPeer::new("aa11", "Alice (laptop)"));
        set.add(TrustedPeer::new("bb22", ""));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("aa11").unwrap().description, "Alice (laptop)");
        assert!(set.remove("bb22").is_some());
        assert!(set.remove("bb22").is_none());
        assert!(!set.contains("bb22"));
    }

    #[test]
    fn test_serialises_as_list() {
        let mut set = TrustedPeerSet::new();
        set.update([TrustedPeer::new("ff", "Bob"), TrustedPeer::new("0a", "Carol")]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"[{"fingerprint":"0a","description":"Carol"},{"fingerprint":"ff","description":"Bob"}]"#
        );
        let back: TrustedPeerSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
