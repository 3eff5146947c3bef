//! The routing engine: deliver, queue, or forward inbound wire messages.
//!
//! Per inbound message: drop duplicates by signature, decrypt what is
//! addressed to us, queue what belongs to a known contact, then - budget
//! permitting - forward to a random subset of contacts. TTL and retry
//! budgets shrink by a uniform 0..=2 each hop, so the averages fall by
//! one per hop while the exact values leak nothing about hop distance.
//!
//! Cryptographic failures on inbound messages are swallowed: the
//! counter ticks, a debug line is logged, and the caller still answers
//! 200, so an active attacker learns nothing from status codes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::index::sample;
use rand::Rng;
use tracing::{debug, warn};

use zerotrace_identity::{Identifier, Identity};
use zerotrace_proto::{envelope, WireMessage};
use zerotrace_store::{Contact, ContactStore, ForwardQueue, InboxStore, SeenStore};

use crate::error::Result;

/// Largest fanout per hop.
pub const FANOUT_CAP: usize = 10;

/// Fraction of eligible contacts that bounds the fanout from below.
pub const FANOUT_FLOOR_RATIO: f64 = 0.3;

/// The transport seam the router sends forwarded copies through.
#[async_trait]
pub trait WireSender: Send + Sync {
    /// Deliver `wire` to the peer at `addr`.
    async fn send_wire(&self, addr: &str, wire: &WireMessage) -> Result<()>;
}

/// Counters for the routing engine.
#[derive(Debug, Default)]
pub struct RouterStats {
    received: AtomicU64,
    duplicates: AtomicU64,
    delivered: AtomicU64,
    queued: AtomicU64,
    forwarded: AtomicU64,
    send_failures: AtomicU64,
    dropped_crypto: AtomicU64,
    dropped_expired: AtomicU64,
    dropped_isolated: AtomicU64,
}

/// A point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterStatsSnapshot {
    /// Messages that passed the duplicate gate.
    pub received: u64,
    /// Duplicates dropped by signature.
    pub duplicates: u64,
    /// Messages decrypted into the inbox.
    pub delivered: u64,
    /// Messages pushed to the forward queue.
    pub queued: u64,
    /// Forwarded copies handed to the transport.
    pub forwarded: u64,
    /// Forward sends that failed.
    pub send_failures: u64,
    /// Inbound messages dropped for cryptographic reasons.
    pub dropped_crypto: u64,
    /// Messages dropped with an exhausted ttl or retry budget.
    pub dropped_expired: u64,
    /// Messages dropped for want of eligible contacts.
    pub dropped_isolated: u64,
}

impl RouterStats {
    fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            dropped_crypto: self.dropped_crypto.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
            dropped_isolated: self.dropped_isolated.load(Ordering::Relaxed),
        }
    }
}

/// The per-node routing engine.
pub struct Router {
    identity: Arc<Identity>,
    contacts: ContactStore,
    inbox: InboxStore,
    forward: ForwardQueue,
    seen: SeenStore,
    sender: Arc<dyn WireSender>,
    stats: Arc<RouterStats>,
}

impl Router {
    /// Assemble a router over the node's stores and transport.
    pub fn new(
        identity: Arc<Identity>,
        contacts: ContactStore,
        inbox: InboxStore,
        forward: ForwardQueue,
        seen: SeenStore,
        sender: Arc<dyn WireSender>,
    ) -> Self {
        Self {
            identity,
            contacts,
            inbox,
            forward,
            seen,
            sender,
            stats: Arc::new(RouterStats::default()),
        }
    }

    /// Counters snapshot.
    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one inbound wire message.
    ///
    /// Fanout sends are spawned as independent tasks; this returns as
    /// soon as they are scheduled. The seen-set insert commits before
    /// any fanout, so copies looping back are filtered even while the
    /// fanout is in flight.
    ///
    /// # Errors
    ///
    /// Only structural (`Malformed`) and storage errors escape; crypto
    /// failures are dropped silently by design.
    pub async fn handle_inbound(&self, mut wire: WireMessage) -> Result<()> {
        wire.validate()?;

        if !self.seen.insert_if_new(&wire.signature).await? {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!("dropping duplicate wire message");
            return Ok(());
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if wire.recipient_identifier == self.identity.identifier().as_str() {
            self.deliver_local(&wire).await?;
            return Ok(());
        }

        if let Ok(recipient) = Identifier::parse(&wire.recipient_identifier) {
            if self.contacts.get(&recipient).await?.is_some() {
                if self.forward.push(&wire).await? {
                    self.stats.queued.fetch_add(1, Ordering::Relaxed);
                    debug!(recipient = recipient.short(), "queued for known contact");
                }
                wire.max_recursive_contact =
                    wire.max_recursive_contact.saturating_sub(hop_decrement());
            }
        }

        let previous_hop = std::mem::replace(
            &mut wire.current_node_identifier,
            self.identity.identifier().as_str().to_string(),
        );
        wire.ttl = wire.ttl.saturating_sub(hop_decrement());

        if wire.ttl == 0 || wire.max_recursive_contact == 0 {
            self.stats.dropped_expired.fetch_add(1, Ordering::Relaxed);
            debug!(ttl = wire.ttl, retry = wire.max_recursive_contact, "budget exhausted");
            return Ok(());
        }

        let eligible = self.eligible_contacts(&previous_hop).await?;
        if eligible.is_empty() {
            self.stats.dropped_isolated.fetch_add(1, Ordering::Relaxed);
            debug!("no eligible contacts to forward to");
            return Ok(());
        }

        self.spawn_fanout(wire, eligible);
        Ok(())
    }

    /// Contacts minus the previous hop and ourselves.
    async fn eligible_contacts(&self, previous_hop: &str) -> Result<Vec<Contact>> {
        let own = self.identity.identifier().as_str();
        Ok(self
            .contacts
            .list()
            .await?
            .into_iter()
            .filter(|c| c.identifier.as_str() != previous_hop && c.identifier.as_str() != own)
            .collect())
    }

    /// Pick the fanout subset and fire the sends without awaiting them.
    fn spawn_fanout(&self, wire: WireMessage, eligible: Vec<Contact>) {
        let targets = choose_fanout(&eligible);
        debug!(
            eligible = eligible.len(),
            fanout = targets.len(),
            "forwarding wire message"
        );
        for index in targets {
            let contact = eligible[index].clone();
            let wire = wire.clone();
            let sender = Arc::clone(&self.sender);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                match sender.send_wire(&contact.addr, &wire).await {
                    Ok(()) => {
                        stats.forwarded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            peer = contact.identifier.short(),
                            error = %e,
                            "forward send failed"
                        );
                    }
                }
            });
        }
    }

    /// Decrypt a message addressed to us; failures are silent drops.
    async fn deliver_local(&self, wire: &WireMessage) -> Result<()> {
        let opened = match envelope::open(&self.identity, wire) {
            Ok(opened) => opened,
            Err(e) => {
                self.stats.dropped_crypto.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "dropping undecryptable inbound message");
                return Ok(());
            }
        };

        self.inbox
            .add(
                &opened.sender_id,
                Some(self.identity.identifier()),
                &opened.msg,
                opened.ts,
            )
            .await?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);

        // A validly signed message introduces its sender.
        let contact = Contact {
            identifier: opened.sender_id.clone(),
            name: None,
            addr: opened.sender_addr.clone(),
            kem_public_key: opened.sender_kem_pk.clone(),
            sig_public_key: opened.sender_sig_pk.clone(),
        };
        if let Err(e) = self.contacts.add(&contact).await {
            warn!(error = %e, "failed to auto-add sender as contact");
        }

        debug!(sender = opened.sender_id.short(), "message delivered to inbox");
        Ok(())
    }
}

/// Per-hop budget decrement: uniform over 0..=2.
fn hop_decrement() -> u8 {
    rand::thread_rng().gen_range(0..=2)
}

/// Fanout cardinality and selection: a uniform draw of
/// `ceil(0.3 * E)..=min(E, 10)` targets, sampled without replacement.
///
/// Returns indices into `eligible`.
pub fn choose_fanout(eligible: &[Contact]) -> Vec<usize> {
    let e = eligible.len();
    if e == 0 {
        return Vec::new();
    }
    let upper = e.min(FANOUT_CAP);
    let lower = ((e as f64 * FANOUT_FLOOR_RATIO).ceil() as usize).clamp(1, upper);

    let mut rng = rand::thread_rng();
    let n = rng.gen_range(lower..=upper);
    sample(&mut rng, e, n).into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use zerotrace_store::Database;

    /// Records every send; optionally fails for chosen addresses.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, WireMessage)>>,
        fail: Mutex<HashMap<String, ()>>,
    }

    #[async_trait]
    impl WireSender for RecordingSender {
        async fn send_wire(&self, addr: &str, wire: &WireMessage) -> Result<()> {
            if self.fail.lock().contains_key(addr) {
                return Err(crate::NetError::Unreachable(addr.to_string()));
            }
            self.sent.lock().push((addr.to_string(), wire.clone()));
            Ok(())
        }
    }

    struct Fixture {
        router: Router,
        sender: Arc<RecordingSender>,
        contacts: ContactStore,
        inbox: InboxStore,
        forward: ForwardQueue,
        seen: SeenStore,
        identity: Arc<Identity>,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let identity = Arc::new(Identity::generate().unwrap());
        let contacts = ContactStore::new(&db);
        let inbox = InboxStore::new(&db);
        let forward = ForwardQueue::new(&db);
        let seen = SeenStore::new(&db);
        let sender = Arc::new(RecordingSender::default());
        let router = Router::new(
            Arc::clone(&identity),
            contacts.clone(),
            inbox.clone(),
            forward.clone(),
            seen.clone(),
            sender.clone(),
        );
        Fixture {
            router,
            sender,
            contacts,
            inbox,
            forward,
            seen,
            identity,
        }
    }

    fn synthetic_contact(tag: u8) -> Contact {
        let kem = vec![tag; 16];
        let sig = vec![tag.wrapping_add(1); 16];
        Contact {
            identifier: Identifier::from_public_keys(&kem, &sig),
            name: None,
            addr: format!("contact-{tag}.b32.i2p"),
            kem_public_key: kem,
            sig_public_key: sig,
        }
    }

    fn wire_for(recipient: &str, sig_seed: u8, ttl: u8, retry: u8) -> WireMessage {
        WireMessage {
            current_node_identifier: Identifier::from_public_keys(b"prev", b"hop")
                .as_str()
                .to_string(),
            recipient_identifier: recipient.to_string(),
            shared_secret_ciphertext: vec![0u8; zerotrace_crypto::mlkem::CIPHERTEXT_SIZE],
            message_ciphertext: vec![7u8; 64],
            nonce: vec![0u8; zerotrace_crypto::symmetric::NONCE_SIZE],
            signature: vec![sig_seed; zerotrace_crypto::mldsa::SIGNATURE_SIZE],
            ttl,
            max_recursive_contact: retry,
        }
    }

    async fn settle() {
        // Let spawned fanout tasks run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped_before_any_effect() {
        let f = fixture();
        for n in 0..10u8 {
            f.contacts.add(&synthetic_contact(n)).await.unwrap();
        }
        let other = Identifier::from_public_keys(b"someone", b"else");
        let wire = wire_for(other.as_str(), 42, 10, 5);

        f.router.handle_inbound(wire.clone()).await.unwrap();
        settle().await;
        let first_round = f.sender.sent.lock().len();
        assert!(first_round > 0);

        f.router.handle_inbound(wire).await.unwrap();
        settle().await;
        assert_eq!(f.sender.sent.lock().len(), first_round, "no second fanout");
        assert_eq!(f.router.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_addressed_to_me_goes_to_inbox() {
        let f = fixture();
        let alice = Identity::generate().unwrap();
        let wire = envelope::seal(
            &alice,
            "alice.b32.i2p",
            f.identity.identifier(),
            &f.identity.kem_public().to_bytes(),
            b"hello bob",
        )
        .unwrap();

        f.router.handle_inbound(wire).await.unwrap();

        assert_eq!(f.inbox.count().await.unwrap(), 1);
        let stored = &f.inbox.recent(1).await.unwrap()[0];
        assert_eq!(stored.content, b"hello bob");
        assert_eq!(stored.sender_id, alice.identifier().as_str());

        // The sender was auto-added with the payload address.
        let contact = f.contacts.get(alice.identifier()).await.unwrap().unwrap();
        assert_eq!(contact.addr, "alice.b32.i2p");
        assert_eq!(f.router.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_garbage_for_me_is_silently_dropped() {
        let f = fixture();
        let wire = wire_for(f.identity.identifier().as_str(), 9, 10, 5);

        // No error escapes; the counter ticks; nothing is stored.
        f.router.handle_inbound(wire).await.unwrap();
        assert_eq!(f.inbox.count().await.unwrap(), 0);
        assert_eq!(f.router.stats().dropped_crypto, 1);
    }

    #[tokio::test]
    async fn test_known_recipient_is_queued() {
        let f = fixture();
        let carol = synthetic_contact(3);
        f.contacts.add(&carol).await.unwrap();

        let wire = wire_for(carol.identifier.as_str(), 5, 10, 5);
        f.router.handle_inbound(wire).await.unwrap();

        assert_eq!(f.forward.count_for(carol.identifier.as_str()).await.unwrap(), 1);
        assert_eq!(f.router.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_ttl_exhaustion_still_marks_seen() {
        let f = fixture();
        for n in 0..4u8 {
            f.contacts.add(&synthetic_contact(n)).await.unwrap();
        }
        let other = Identifier::from_public_keys(b"far", b"away");
        // ttl = 1 can reach 0 after the random decrement; run enough
        // messages that at least one gets dropped.
        for seed in 0..32u8 {
            let wire = wire_for(other.as_str(), seed, 1, 5);
            f.router.handle_inbound(wire).await.unwrap();
        }
        settle().await;

        let stats = f.router.stats();
        assert!(stats.dropped_expired > 0, "some decrements hit zero");
        // Every message entered the seen set regardless of ttl fate.
        assert_eq!(f.seen.len().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn test_no_forward_with_zero_budgets() {
        let f = fixture();
        f.contacts.add(&synthetic_contact(1)).await.unwrap();
        let other = Identifier::from_public_keys(b"x", b"y");

        f.router
            .handle_inbound(wire_for(other.as_str(), 1, 0, 5))
            .await
            .unwrap();
        f.router
            .handle_inbound(wire_for(other.as_str(), 2, 5, 0))
            .await
            .unwrap();
        settle().await;
        assert!(f.sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_contacts_means_drop() {
        let f = fixture();
        let other = Identifier::from_public_keys(b"x", b"y");
        f.router
            .handle_inbound(wire_for(other.as_str(), 1, 10, 5))
            .await
            .unwrap();
        settle().await;
        assert!(f.sender.sent.lock().is_empty());
        assert_eq!(f.router.stats().dropped_isolated, 1);
    }

    #[tokio::test]
    async fn test_previous_hop_excluded_from_fanout() {
        let f = fixture();
        let prev = synthetic_contact(1);
        let other_contact = synthetic_contact(2);
        f.contacts.add(&prev).await.unwrap();
        f.contacts.add(&other_contact).await.unwrap();

        let recipient = Identifier::from_public_keys(b"u", b"v");
        let mut wire = wire_for(recipient.as_str(), 1, 10, 5);
        wire.current_node_identifier = prev.identifier.as_str().to_string();

        f.router.handle_inbound(wire).await.unwrap();
        settle().await;

        let sent = f.sender.sent.lock();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|(addr, _)| addr != &prev.addr));
    }

    #[tokio::test]
    async fn test_forwarded_copy_names_us_as_current_node() {
        let f = fixture();
        f.contacts.add(&synthetic_contact(1)).await.unwrap();
        let recipient = Identifier::from_public_keys(b"u", b"v");
        let wire = wire_for(recipient.as_str(), 1, 10, 5);
        let original_ttl = wire.ttl;

        f.router.handle_inbound(wire).await.unwrap();
        settle().await;

        let sent = f.sender.sent.lock();
        let (_, forwarded) = &sent[0];
        assert_eq!(
            forwarded.current_node_identifier,
            f.identity.identifier().as_str()
        );
        assert!(forwarded.ttl <= original_ttl);
    }

    #[tokio::test]
    async fn test_send_failures_do_not_fail_handling() {
        let f = fixture();
        let unlucky = synthetic_contact(1);
        f.sender.fail.lock().insert(unlucky.addr.clone(), ());
        f.contacts.add(&unlucky).await.unwrap();

        let recipient = Identifier::from_public_keys(b"u", b"v");
        f.router
            .handle_inbound(wire_for(recipient.as_str(), 1, 10, 5))
            .await
            .unwrap();
        settle().await;
        assert_eq!(f.router.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_wire_is_an_error() {
        let f = fixture();
        let mut wire = wire_for("whoever", 1, 10, 5);
        wire.nonce = vec![0u8; 3];
        assert!(f.router.handle_inbound(wire).await.is_err());
    }

    #[test]
    fn test_fanout_bounds_hold() {
        for e in [1usize, 2, 3, 5, 10, 15, 40] {
            let eligible: Vec<Contact> = (0..e as u8).map(synthetic_contact).collect();
            for _ in 0..64 {
                let n = choose_fanout(&eligible).len();
                let upper = e.min(FANOUT_CAP);
                let lower = ((e as f64 * FANOUT_FLOOR_RATIO).ceil() as usize).clamp(1, upper);
                assert!(n >= lower && n <= upper, "E={e} n={n}");
            }
        }
    }

    #[test]
    fn test_fanout_indices_unique() {
        let eligible: Vec<Contact> = (0..12u8).map(synthetic_contact).collect();
        for _ in 0..32 {
            let picked = choose_fanout(&eligible);
            let mut dedup = picked.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(picked.len(), dedup.len());
        }
    }

    #[test]
    fn test_fanout_empty_eligible() {
        assert!(choose_fanout(&[]).is_empty());
    }
}
