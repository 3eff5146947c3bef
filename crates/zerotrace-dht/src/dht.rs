//! The DHT facade: lookup, publish, validated ingest, and maintenance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::index::sample;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{DhtError, Result};
use crate::id::NodeId;
use crate::lookup::{lookup, LookupOutcome};
use crate::record::{now_unix, record_key, DirectoryRecord, MAX_RECORD_BYTES, VALUE_TTL};
use crate::routing::{NodeAddr, Peer, RoutingTable, ALPHA, K};
use crate::rpc::{DhtTransport, FindValueResult, SelfInfo};
use crate::store::DhtDatabase;

/// Tunables for the DHT. Defaults follow the protocol constants.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket size and replication factor.
    pub k: usize,
    /// Lookup parallelism.
    pub alpha: usize,
    /// How often untouched buckets are probed.
    pub bucket_refresh_interval: Duration,
    /// How often stored values are re-replicated.
    pub replication_interval: Duration,
    /// How often expired values are collected.
    pub expiration_interval: Duration,
    /// How often idle peers are pinged.
    pub liveness_interval: Duration,
    /// A peer unseen this long gets pinged; unresponsive peers are evicted.
    pub node_idle_timeout: Duration,
    /// Stored values older than this are dropped (or republished by
    /// their originator).
    pub value_ttl: Duration,
    /// How long persisted peers stay eligible for reload at startup.
    pub node_reload_max_age: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: K,
            alpha: ALPHA,
            bucket_refresh_interval: Duration::from_secs(60 * 60),
            replication_interval: Duration::from_secs(60 * 60),
            expiration_interval: Duration::from_secs(6 * 60 * 60),
            liveness_interval: Duration::from_secs(5 * 60),
            node_idle_timeout: Duration::from_secs(15 * 60),
            value_ttl: VALUE_TTL,
            node_reload_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Operation counters, exported for the node's status surface.
#[derive(Debug, Default)]
pub struct DhtStats {
    /// Iterative lookups started.
    pub lookups: AtomicU64,
    /// Publish operations started.
    pub publishes: AtomicU64,
    /// Values accepted on ingest.
    pub records_accepted: AtomicU64,
    /// Values rejected on ingest or during lookup validation.
    pub records_rejected: AtomicU64,
    /// Peers evicted by the liveness loop.
    pub evictions: AtomicU64,
    /// Buckets probed by the refresh loop.
    pub bucket_refreshes: AtomicU64,
}

impl DhtStats {
    /// Snapshot the counters.
    pub fn snapshot(&self) -> DhtStatsSnapshot {
        DhtStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bucket_refreshes: self.bucket_refreshes.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`DhtStats`].
#[derive(Debug, Clone, Copy)]
pub struct DhtStatsSnapshot {
    /// Iterative lookups started.
    pub lookups: u64,
    /// Publish operations started.
    pub publishes: u64,
    /// Values accepted on ingest.
    pub records_accepted: u64,
    /// Values rejected on ingest or during lookup validation.
    pub records_rejected: u64,
    /// Peers evicted by the liveness loop.
    pub evictions: u64,
    /// Buckets probed by the refresh loop.
    pub bucket_refreshes: u64,
}

/// A Kademlia node: routing table, value store, and the operations the
/// HTTP surface and maintenance loops drive.
pub struct Dht {
    info: SelfInfo,
    routing: Mutex<RoutingTable>,
    db: DhtDatabase,
    transport: Arc<dyn DhtTransport>,
    config: DhtConfig,
    stats: DhtStats,
}

impl Dht {
    /// Open the DHT: restore the persistent node id and reload known
    /// peers into the routing table.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn open(
        db: DhtDatabase,
        addr: NodeAddr,
        transport: Arc<dyn DhtTransport>,
        config: DhtConfig,
    ) -> Result<Arc<Self>> {
        let id = db.load_or_create_node_id().await?;
        let mut routing = RoutingTable::with_k(id, config.k);

        let reloaded = db
            .load_nodes(config.node_reload_max_age.as_secs())
            .await?;
        for peer in &reloaded {
            routing.update(peer.id, peer.addr.clone(), peer.last_seen);
        }
        if !reloaded.is_empty() {
            info!(count = reloaded.len(), "reloaded known dht peers");
        }

        Ok(Arc::new(Self {
            info: SelfInfo { id, addr },
            routing: Mutex::new(routing),
            db,
            transport,
            config,
            stats: DhtStats::default(),
        }))
    }

    /// This node's id and address.
    pub fn self_info(&self) -> &SelfInfo {
        &self.info
    }

    /// The local node id.
    pub fn local_id(&self) -> &NodeId {
        &self.info.id
    }

    /// Operation counters.
    pub fn stats(&self) -> DhtStatsSnapshot {
        self.stats.snapshot()
    }

    /// The underlying value/peer store.
    pub fn database(&self) -> &DhtDatabase {
        &self.db
    }

    /// Number of live peers in the routing table.
    pub fn peer_count(&self) -> usize {
        self.routing.lock().len()
    }

    /// Fold a peer we heard from into the routing table and persist it.
    pub async fn observe(&self, id: NodeId, addr: NodeAddr) {
        if id == self.info.id {
            return;
        }
        let now = now_unix();
        let newly_added = self.routing.lock().update(id, addr.clone(), now);
        if newly_added {
            debug!(peer = %id, %addr, "new dht peer");
        }
        if let Err(e) = self.db.upsert_node(&id, &addr, now).await {
            warn!(error = %e, "failed to persist dht peer");
        }
    }

    /// Serve `find_node`: the k closest live peers to `target`.
    pub fn handle_find_node(&self, target: &NodeId) -> Vec<Peer> {
        self.routing.lock().closest(target, self.config.k)
    }

    /// Serve `find_value`: the stored value, or the k closest peers.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub async fn handle_find_value(&self, key: &NodeId) -> Result<FindValueResult> {
        if let Some(value) = self.db.get_value(key).await? {
            return Ok(FindValueResult::Value(value));
        }
        let peers = self.handle_find_node(key);
        Ok(FindValueResult::Nodes(
            peers.into_iter().map(|p| (p.id, p.addr)).collect(),
        ))
    }

    /// Validate and store a value pushed by a peer.
    ///
    /// # Errors
    ///
    /// - `DhtError::InvalidRecord` / `DhtError::StaleRecord` when the
    ///   payload fails record validation
    /// - `DhtError::Malformed` when the key is not the record's key
    pub async fn ingest_value(&self, key: &NodeId, value: &[u8]) -> Result<()> {
        if value.len() > MAX_RECORD_BYTES {
            self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DhtError::InvalidRecord(format!(
                "value is {} bytes, limit {}",
                value.len(),
                MAX_RECORD_BYTES
            )));
        }
        let record = match DirectoryRecord::from_bytes(value)
            .and_then(|r| r.validate(now_unix()).map(|()| r))
        {
            Ok(record) => record,
            Err(e) => {
                self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        if record.key() != *key {
            self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DhtError::Malformed(
                "store key is not the hash of the record identifier".into(),
            ));
        }

        self.db.put_value(key, value, false).await?;
        self.stats.records_accepted.fetch_add(1, Ordering::Relaxed);
        debug!(identifier = %record.identifier, "ingested directory record");
        Ok(())
    }

    /// Join the network through a known peer: learn its id, introduce
    /// ourselves, then walk toward our own id to fill nearby buckets.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable.
    pub async fn bootstrap(&self, peer: &NodeAddr) -> Result<()> {
        let peer_id = self.transport.fetch_id(peer).await?;
        self.observe(peer_id, peer.clone()).await;

        // Symmetric join: the peer adds us too.
        if let Err(e) = self.transport.announce(peer, &self.info).await {
            warn!(error = %e, %peer, "symmetric bootstrap announce failed");
        }

        let found = self.iterative_find_nodes(&self.info.id).await;
        info!(peer = %peer_id, discovered = found.len(), "bootstrap complete");
        Ok(())
    }

    /// Iteratively find the k closest nodes to `target`.
    pub async fn iterative_find_nodes(&self, target: &NodeId) -> Vec<(NodeId, NodeAddr)> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let seeds = self.seed_candidates(target);
        let (outcome, responders) = lookup(
            Arc::clone(&self.transport),
            &self.info,
            target,
            seeds,
            self.config.k,
            self.config.alpha,
            false,
            |_| false,
        )
        .await;
        self.absorb_responders(responders).await;
        match outcome {
            LookupOutcome::Nodes(nodes) => nodes,
            LookupOutcome::Value(_) => Vec::new(),
        }
    }

    /// Publish a signed directory record under its identifier key.
    ///
    /// The record is stored locally (as originator) and pushed to a
    /// randomized replica set: `target_count` drawn from `k..=k+5`,
    /// sampled uniformly from the `2 * target_count` closest candidates,
    /// which defeats a predictable-eclipse placement.
    ///
    /// # Errors
    ///
    /// Returns `DhtError::UnderReplicated` if fewer than the required
    /// majority of replicas acknowledged.
    pub async fn publish(&self, record: &DirectoryRecord) -> Result<usize> {
        record.validate(now_unix())?;
        let key = record.key();
        let value = record.to_bytes()?;
        self.db.put_value(&key, &value, true).await?;
        self.store_replicated(&key, &value, None).await
    }

    /// Discover a user's directory record by identifier.
    ///
    /// Runs an iterative `find_value` lookup; responses that fail
    /// validation are discarded and the lookup continues, so a poisoned
    /// replica cannot mask the honest ones.
    ///
    /// # Errors
    ///
    /// Returns `DhtError::NotFound` if no valid record was located.
    pub async fn discover(&self, identifier: &str) -> Result<DirectoryRecord> {
        let key = record_key(identifier);

        // A locally held copy short-circuits the network walk.
        if let Some(bytes) = self.db.get_value(&key).await? {
            if let Ok(record) = DirectoryRecord::from_bytes(&bytes)
                .and_then(|r| r.validate(now_unix()).map(|()| r))
            {
                if record.identifier == identifier {
                    return Ok(record);
                }
            }
        }

        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let seeds = self.seed_candidates(&key);
        let rejected = AtomicU64::new(0);
        let (outcome, responders) = lookup(
            Arc::clone(&self.transport),
            &self.info,
            &key,
            seeds,
            self.config.k,
            self.config.alpha,
            true,
            |bytes| {
                let valid = DirectoryRecord::from_bytes(bytes)
                    .and_then(|r| r.validate(now_unix()).map(|()| r))
                    .map(|r| r.identifier == identifier)
                    .unwrap_or(false);
                if !valid {
                    rejected.fetch_add(1, Ordering::Relaxed);
                }
                valid
            },
        )
        .await;
        self.stats
            .records_rejected
            .fetch_add(rejected.load(Ordering::Relaxed), Ordering::Relaxed);
        self.absorb_responders(responders).await;

        match outcome {
            LookupOutcome::Value(bytes) => {
                let record = DirectoryRecord::from_bytes(&bytes)?;
                // Cache the validated record as a replica.
                self.db.put_value(&key, &bytes, false).await?;
                Ok(record)
            }
            LookupOutcome::Nodes(_) => Err(DhtError::NotFound),
        }
    }

    /// Store raw value bytes under `key` across a randomized replica
    /// set (the `/set` entry point).
    ///
    /// # Errors
    ///
    /// Validation errors propagate; see [`Dht::ingest_value`].
    pub async fn publish_value(&self, key: &NodeId, value: &[u8]) -> Result<usize> {
        self.ingest_value(key, value).await?;
        self.store_replicated(key, value, None).await
    }

    async fn store_replicated(
        &self,
        key: &NodeId,
        value: &[u8],
        replica_count: Option<usize>,
    ) -> Result<usize> {
        self.stats.publishes.fetch_add(1, Ordering::Relaxed);
        let k = self.config.k;
        let target_count =
            replica_count.unwrap_or_else(|| rand::thread_rng().gen_range(k..=k + 5));

        // Candidate pool: the 2 * target_count closest nodes we can find.
        let mut pool = self.iterative_find_nodes(key).await;
        for peer in self.routing.lock().closest(key, 2 * target_count) {
            if !pool.iter().any(|(id, _)| *id == peer.id) {
                pool.push((peer.id, peer.addr));
            }
        }
        pool.sort_by_key(|(id, _)| id.distance(key));
        pool.truncate(2 * target_count);

        if pool.is_empty() {
            debug!(key = %key, "no peers to replicate to; stored locally only");
            return Ok(0);
        }

        let take = target_count.min(pool.len());
        let replicas: Vec<(NodeId, NodeAddr)> = {
            let mut rng = rand::thread_rng();
            sample(&mut rng, pool.len(), take)
                .into_iter()
                .map(|i| pool[i].clone())
                .collect()
        };

        let mut stores: JoinSet<bool> = JoinSet::new();
        for (_, addr) in replicas {
            let transport = Arc::clone(&self.transport);
            let info = self.info.clone();
            let key = *key;
            let value = value.to_vec();
            stores.spawn(async move {
                transport
                    .store(&addr, &info, &key, &value)
                    .await
                    .unwrap_or(false)
            });
        }
        let mut acks = 0usize;
        while let Some(result) = stores.join_next().await {
            if matches!(result, Ok(true)) {
                acks += 1;
            }
        }

        let required = k.div_ceil(2).min(take).max(1);
        if acks < required {
            warn!(%key, acks, required, "store under-replicated");
            return Err(DhtError::UnderReplicated { acks, required });
        }
        debug!(%key, acks, "value replicated");
        Ok(acks)
    }

    fn seed_candidates(&self, target: &NodeId) -> Vec<(NodeId, NodeAddr)> {
        self.routing
            .lock()
            .closest(target, self.config.k)
            .into_iter()
            .map(|p| (p.id, p.addr))
            .collect()
    }

    async fn absorb_responders(&self, responders: Vec<(NodeId, NodeAddr)>) {
        for (id, addr) in responders {
            self.observe(id, addr).await;
        }
    }

    /// Spawn the four maintenance loops, each tied to the shutdown
    /// channel: bucket refresh, replication, expiration, and liveness.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        {
            let dht = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            let period = dht.config.bucket_refresh_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => dht.refresh_stale_buckets().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let dht = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            let period = dht.config.replication_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => dht.replicate_values().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let dht = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            let period = dht.config.expiration_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => dht.expire_values().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let dht = Arc::clone(&self);
            let mut shutdown = shutdown;
            let period = dht.config.liveness_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => dht.check_liveness().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        handles
    }

    /// Probe every non-empty bucket untouched for a full refresh
    /// interval with a lookup for a random id in its range.
    pub async fn refresh_stale_buckets(&self) {
        let cutoff = now_unix().saturating_sub(self.config.bucket_refresh_interval.as_secs());
        let stale: Vec<(usize, NodeId)> = {
            let routing = self.routing.lock();
            routing
                .stale_buckets(cutoff)
                .into_iter()
                .map(|i| (i, routing.random_id_in_bucket(i)))
                .collect()
        };
        for (index, probe) in stale {
            self.iterative_find_nodes(&probe).await;
            self.routing.lock().mark_refreshed(index, now_unix());
            self.stats.bucket_refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Re-store every held value to a freshly sampled replica set of
    /// `k + {0..3}` close nodes.
    pub async fn replicate_values(&self) {
        let values = match self.db.all_values().await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "replication sweep failed to read values");
                return;
            }
        };
        for stored in values {
            let extra = rand::thread_rng().gen_range(0..=3);
            if let Err(e) = self
                .store_replicated(&stored.key, &stored.value, Some(self.config.k + extra))
                .await
            {
                debug!(key = %stored.key, error = %e, "replication pass incomplete");
            }
        }
    }

    /// Drop values older than the TTL; values this node originated are
    /// republished with a fresh timestamp instead.
    pub async fn expire_values(&self) {
        let cutoff = now_unix().saturating_sub(self.config.value_ttl.as_secs());
        let expired = match self.db.values_older_than(cutoff).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "expiration sweep failed to read values");
                return;
            }
        };
        for stored in expired {
            if stored.is_origin {
                // Refresh our own record rather than letting it lapse.
                if let Err(e) = self.db.put_value(&stored.key, &stored.value, true).await {
                    warn!(error = %e, "failed to refresh origin value");
                    continue;
                }
                if let Err(e) = self
                    .store_replicated(&stored.key, &stored.value, None)
                    .await
                {
                    debug!(key = %stored.key, error = %e, "origin republish incomplete");
                }
            } else if let Err(e) = self.db.delete_value(&stored.key).await {
                warn!(error = %e, "failed to delete expired value");
            } else {
                debug!(key = %stored.key, "expired dht value");
            }
        }
    }

    /// Ping peers unseen past the idle timeout; evict the unresponsive,
    /// promoting replacement-cache candidates.
    pub async fn check_liveness(&self) {
        let cutoff = now_unix().saturating_sub(self.config.node_idle_timeout.as_secs());
        let idle = self.routing.lock().idle_peers(cutoff);
        for peer in idle {
            match self.transport.ping(&peer.addr, &self.info).await {
                Ok(id) if id == peer.id => {
                    self.observe(id, peer.addr).await;
                }
                _ => {
                    self.routing.lock().remove(&peer.id);
                    if let Err(e) = self.db.remove_node(&peer.id).await {
                        warn!(error = %e, "failed to drop evicted peer");
                    }
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer.id, "evicted unresponsive peer");
                }
            }
        }
    }
}

impl std::fmt::Debug for Dht {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dht")
            .field("id", &self.info.id)
            .field("addr", &self.info.addr)
            .field("peers", &self.peer_count())
            .finish()
    }
}
