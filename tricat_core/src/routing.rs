//! Routing table: verified contacts and provider records.
//!
//! The table is plain data. The networked operations that fill it (and pay
//! the profile's `routing_delay`) live on [`Node`](crate::Node).

use crate::cid::ContentId;
use std::collections::{BTreeSet, HashMap};
use tricat_env::PeerId;

/// Known contacts and which peers provide which blocks.
#[derive(Debug)]
pub struct RoutingTable {
    local: PeerId,
    contacts: BTreeSet<PeerId>,
    providers: HashMap<ContentId, BTreeSet<PeerId>>,
}

impl RoutingTable {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            contacts: BTreeSet::new(),
            providers: HashMap::new(),
        }
    }

    /// Registers a contact. Returns false if it was already known (or is us).
    pub fn add_contact(&mut self, peer: PeerId) -> bool {
        peer != self.local && self.contacts.insert(peer)
    }

    pub fn is_contact(&self, peer: &PeerId) -> bool {
        self.contacts.contains(peer)
    }

    /// Contacts in a stable order.
    pub fn contacts(&self) -> Vec<PeerId> {
        self.contacts.iter().copied().collect()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Records `peer` as a provider of every block in `cids`.
    pub fn add_providers(&mut self, cids: &[ContentId], peer: PeerId) {
        for cid in cids {
            self.providers.entry(*cid).or_default().insert(peer);
        }
    }

    /// Known providers of `cid`, including this node if it announced it.
    pub fn providers(&self, cid: &ContentId) -> Vec<PeerId> {
        self.providers
            .get(cid)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Known providers of `cid` other than this node.
    pub fn remote_providers(&self, cid: &ContentId) -> Vec<PeerId> {
        self.providers(cid)
            .into_iter()
            .filter(|peer| *peer != self.local)
            .collect()
    }

    /// Number of blocks with at least one provider record.
    pub fn record_count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    #[test]
    fn test_contacts_are_idempotent() {
        let mut table = RoutingTable::new(peer(0));

        assert!(table.add_contact(peer(1)));
        assert!(!table.add_contact(peer(1)));
        assert!(table.is_contact(&peer(1)));
        assert_eq!(table.contact_count(), 1);
    }

    #[test]
    fn test_self_is_never_a_contact() {
        let mut table = RoutingTable::new(peer(0));
        assert!(!table.add_contact(peer(0)));
        assert!(table.contacts().is_empty());
    }

    #[test]
    fn test_provider_records() {
        let mut table = RoutingTable::new(peer(0));
        let a = ContentId::of(b"a");
        let b = ContentId::of(b"b");

        table.add_providers(&[a, b], peer(1));
        table.add_providers(&[a], peer(0));
        table.add_providers(&[a], peer(1));

        assert_eq!(table.providers(&a), vec![peer(0), peer(1)]);
        assert_eq!(table.remote_providers(&a), vec![peer(1)]);
        assert_eq!(table.providers(&b), vec![peer(1)]);
        assert!(table.providers(&ContentId::of(b"c")).is_empty());
        assert_eq!(table.record_count(), 2);
    }
}
