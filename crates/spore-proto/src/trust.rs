//! Trust store: the set of peers whose records passed verification.
//!
//! The [`TrustStore`] trait abstracts where trusted records live.
//! [`MemoryTrustStore`] keeps them in memory; records are never persisted.
//!
//! A record only enters the trusted set through [`TrustStore::admit`], which
//! runs full record verification first. A failed record is discarded. Batches
//! ([`TrustStore::admit_batch`]) are processed record by record, so one bad
//! entry in a `PeerList` does not affect the others.
//!
//! The trust store also backs the TLS layer (see [`ChannelPolicy`]) and the
//! transport's address resolution.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::AdmissionError;
use crate::identity::PeerId;
use crate::record::{verify, TrustedPeerRecord};

/// Policy governing which certificates the QUIC handshake accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPolicy {
    /// Accept any well-formed Ed25519 certificate (chain validation off).
    /// Trust is established afterwards through signed peer records.
    #[default]
    Bootstrap,
    /// Only accept peers whose id is already in the trusted set.
    Pinned,
}

/// Outcome of admitting a batch of records.
#[derive(Debug, Default)]
pub struct AdmissionReport {
    pub admitted: Vec<PeerId>,
    /// The claimed id of each rejected record, with the reason.
    pub rejected: Vec<(String, AdmissionError)>,
}

/// Trait for checking and managing peer trust state.
///
/// Implementations must be `Send + Sync` to allow sharing via
/// `Arc<dyn TrustStore>` across async tasks and TLS verifier callbacks.
pub trait TrustStore: Send + Sync {
    /// Verify `record` and, on success, store it as trusted.
    ///
    /// A record for an already-trusted peer replaces the stored one.
    fn admit(&self, record: TrustedPeerRecord) -> Result<PeerId, AdmissionError>;

    /// Returns the stored record for `peer_id`, if trusted.
    fn lookup(&self, peer_id: &PeerId) -> Option<TrustedPeerRecord>;

    /// Returns `true` if the given peer is explicitly denied.
    fn is_denied(&self, peer_id: &PeerId) -> bool;

    /// Add a peer to the denied set, dropping any trusted record for it.
    fn deny(&self, peer_id: PeerId);

    /// Remove a peer from the denied set. No-op if not present.
    fn undeny(&self, peer_id: &PeerId);

    /// Remove a peer's record from the trusted set. No-op if not present.
    fn untrust(&self, peer_id: &PeerId);

    /// Snapshot of every trusted record. Order is not significant.
    fn trusted_peers(&self) -> Vec<TrustedPeerRecord>;

    fn is_trusted(&self, peer_id: &PeerId) -> bool {
        self.lookup(peer_id).is_some()
    }

    /// Admit each record independently.
    fn admit_batch(&self, records: Vec<TrustedPeerRecord>) -> AdmissionReport {
        let mut report = AdmissionReport::default();
        for record in records {
            let claimed = record.id.clone();
            match self.admit(record) {
                Ok(peer_id) => report.admitted.push(peer_id),
                Err(e) => report.rejected.push((claimed, e)),
            }
        }
        report
    }
}

impl std::fmt::Debug for dyn TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TrustStore")
    }
}

/// In-memory trust store.
#[derive(Default)]
pub struct MemoryTrustStore {
    trusted: RwLock<HashMap<PeerId, TrustedPeerRecord>>,
    denied: RwLock<HashSet<PeerId>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrustStore for MemoryTrustStore {
    fn admit(&self, record: TrustedPeerRecord) -> Result<PeerId, AdmissionError> {
        let peer_id = match verify(&record) {
            Ok(id) => id,
            Err(e) => {
                warn!(claimed = %record.id, address = %record.address, error = %e, "rejected peer record");
                return Err(e.into());
            }
        };

        if self.is_denied(&peer_id) {
            warn!(peer = %peer_id.short_id(), "rejected record from denied peer");
            return Err(AdmissionError::Denied(peer_id));
        }

        debug!(peer = %peer_id.short_id(), address = %record.address, "admitted peer record");
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id.clone(), record);
        Ok(peer_id)
    }

    fn lookup(&self, peer_id: &PeerId) -> Option<TrustedPeerRecord> {
        self.trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .cloned()
    }

    fn is_denied(&self, peer_id: &PeerId) -> bool {
        self.denied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer_id)
    }

    fn deny(&self, peer_id: PeerId) {
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer_id);
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id);
    }

    fn undeny(&self, peer_id: &PeerId) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id);
    }

    fn untrust(&self, peer_id: &PeerId) {
        self.trusted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id);
    }

    fn trusted_peers(&self) -> Vec<TrustedPeerRecord> {
        self.trusted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerificationError;
    use crate::identity::Keypair;

    fn record(kp: &Keypair, addr: &str) -> TrustedPeerRecord {
        TrustedPeerRecord::signed(kp, addr, ["oci-host"])
    }

    #[test]
    fn empty_store_trusts_nobody() {
        let store = MemoryTrustStore::new();
        let id = Keypair::generate().peer_id();
        assert!(!store.is_trusted(&id));
        assert!(!store.is_denied(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn admit_valid_record() {
        let store = MemoryTrustStore::new();
        let kp = Keypair::generate();
        let id = store.admit(record(&kp, "127.0.0.1:9999")).expect("admit");
        assert_eq!(id, kp.peer_id());
        assert_eq!(store.lookup(&id).unwrap().address, "127.0.0.1:9999");
    }

    #[test]
    fn invalid_record_is_not_stored() {
        let store = MemoryTrustStore::new();
        let kp = Keypair::generate();
        let mut bad = record(&kp, "127.0.0.1:9999");
        bad.address = "127.0.0.1:9998".into();

        let err = store.admit(bad).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Verification(VerificationError::SignatureInvalid)
        );
        assert!(!store.is_trusted(&kp.peer_id()));
    }

    #[test]
    fn readmission_replaces_record() {
        let store = MemoryTrustStore::new();
        let kp = Keypair::generate();
        store.admit(record(&kp, "127.0.0.1:1")).unwrap();
        store.admit(record(&kp, "127.0.0.1:2")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&kp.peer_id()).unwrap().address, "127.0.0.1:2");
    }

    #[test]
    fn denied_peer_cannot_be_admitted() {
        let store = MemoryTrustStore::new();
        let kp = Keypair::generate();
        store.deny(kp.peer_id());
        assert_eq!(
            store.admit(record(&kp, "127.0.0.1:9999")),
            Err(AdmissionError::Denied(kp.peer_id()))
        );

        store.undeny(&kp.peer_id());
        assert!(store.admit(record(&kp, "127.0.0.1:9999")).is_ok());
    }

    #[test]
    fn deny_removes_from_trusted() {
        let store = MemoryTrustStore::new();
        let kp = Keypair::generate();
        store.admit(record(&kp, "127.0.0.1:9999")).unwrap();
        store.deny(kp.peer_id());
        assert!(!store.is_trusted(&kp.peer_id()));
        assert!(store.is_denied(&kp.peer_id()));
    }

    #[test]
    fn untrust_noop_if_not_present() {
        let store = MemoryTrustStore::new();
        let id = Keypair::generate().peer_id();
        store.untrust(&id);
        assert!(!store.is_trusted(&id));
    }

    #[test]
    fn batch_with_one_bad_record_admits_the_rest() {
        let store = MemoryTrustStore::new();
        let good_a = Keypair::generate();
        let good_b = Keypair::generate();
        let bad = Keypair::generate();

        let mut forged = record(&bad, "127.0.0.1:3");
        forged.id = good_a.peer_id().to_hex();

        let report = store.admit_batch(vec![
            record(&good_a, "127.0.0.1:1"),
            forged,
            record(&good_b, "127.0.0.1:2"),
        ]);

        assert_eq!(report.admitted.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].1,
            AdmissionError::Verification(VerificationError::IdentityMismatch { .. })
        ));
        assert_eq!(store.trusted_peers().len(), 2);
        assert_eq!(
            store.lookup(&good_a.peer_id()).unwrap().address,
            "127.0.0.1:1"
        );
    }

    #[test]
    fn policy_defaults_to_bootstrap() {
        assert_eq!(ChannelPolicy::default(), ChannelPolicy::Bootstrap);
        assert_ne!(ChannelPolicy::Bootstrap, ChannelPolicy::Pinned);
    }
}
