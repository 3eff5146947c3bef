//! The node runtime: one value owning the unlocked identity, the
//! stores, the DHT, and every background task.
//!
//! Handlers and loops all borrow the same `Arc<Node>`; there is no
//! global state. Shutdown flows through a watch channel: loops exit,
//! the HTTP server drains, queued forwards stay in SQLite, and the
//! identity (and its secret keys) drops last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use zerotrace_dht::{Dht, DhtConfig, DhtDatabase, DirectoryRecord, NodeAddr};
use zerotrace_identity::{Identifier, Identity};
use zerotrace_proto::envelope;
use zerotrace_store::{
    Contact, ContactStore, Database, ForwardQueue, InboxStore, SeenStore,
};

use crate::client::{HttpDhtTransport, OverlayClient};
use crate::error::{NetError, Result};
use crate::overlay::OverlayInfo;
use crate::router::{choose_fanout, Router};
use crate::server::create_router;

/// Messages database filename inside the data directory.
pub const MESSAGES_DB_FILE: &str = "messages.db";

/// DHT database filename inside the data directory.
pub const DHT_DB_FILE: &str = "dht.db";

/// How many messages one `/get_messages` pull may drain.
pub const DEFAULT_DRAIN_BATCH: usize = 50;

/// How often the seen-set sweep runs.
pub const SEEN_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Loopback host the HTTP server binds.
    pub host: String,
    /// Port the HTTP server binds.
    pub port: u16,
    /// Directory holding the keystore and databases.
    pub data_dir: PathBuf,
    /// The overlay contract values (local address, proxy).
    pub overlay: OverlayInfo,
    /// Relay-only mode: skip self-publication to the directory.
    pub server_only: bool,
    /// Batch size for `/get_messages` drains.
    pub drain_batch: usize,
    /// Seen-set sweep period.
    pub seen_sweep_interval: Duration,
    /// DHT tunables.
    pub dht: DhtConfig,
}

impl NodeConfig {
    /// Defaults rooted at a data directory, in developer mode until an
    /// overlay is configured.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8625,
            data_dir: data_dir.into(),
            overlay: OverlayInfo::direct("127.0.0.1:8625"),
            server_only: false,
            drain_batch: DEFAULT_DRAIN_BATCH,
            seen_sweep_interval: SEEN_SWEEP_INTERVAL,
            dht: DhtConfig::default(),
        }
    }

    /// Set the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the overlay values.
    pub fn with_overlay(mut self, overlay: OverlayInfo) -> Self {
        self.overlay = overlay;
        self
    }

    /// Enable relay-only mode.
    pub fn with_server_only(mut self, server_only: bool) -> Self {
        self.server_only = server_only;
        self
    }

    /// Override the DHT tunables.
    pub fn with_dht(mut self, dht: DhtConfig) -> Self {
        self.dht = dht;
        self
    }
}

/// Outcome of a user-initiated send.
#[derive(Debug)]
pub enum SendOutcome {
    /// The recipient's node took the message directly.
    Direct,
    /// Direct delivery failed; the message was queued locally and
    /// `accepted` fanout peers took a copy.
    Fanout {
        /// Forward copies accepted by peers.
        accepted: usize,
    },
    /// Direct delivery failed and no contacts could take a copy; the
    /// message stays queued for the recipient to pull.
    Queued,
}

/// A running ZeroTrace node.
pub struct Node {
    config: NodeConfig,
    identity: Arc<Identity>,
    contacts: ContactStore,
    inbox: InboxStore,
    forward: ForwardQueue,
    seen: SeenStore,
    router: Router,
    dht: Arc<Dht>,
    client: Arc<OverlayClient>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Assemble a node from an unlocked identity.
    ///
    /// Opens both databases under the data directory, builds the
    /// proxy-aware client, and restores the DHT state.
    ///
    /// # Errors
    ///
    /// Returns an error if storage or the HTTP client fail to
    /// initialize.
    pub async fn new(config: NodeConfig, identity: Identity) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let identity = Arc::new(identity);
        let db = Database::open(&config.data_dir.join(MESSAGES_DB_FILE))
            .map_err(NetError::from)?;
        let contacts = ContactStore::new(&db);
        let inbox = InboxStore::new(&db);
        let forward = ForwardQueue::new(&db);
        let seen = SeenStore::new(&db);

        let client = Arc::new(OverlayClient::new(config.overlay.proxy.as_deref())?);

        let (dht_host, dht_port) = config.overlay.host_port();
        let dht = Dht::open(
            DhtDatabase::open(&config.data_dir.join(DHT_DB_FILE)).map_err(NetError::from)?,
            NodeAddr::new(dht_host, dht_port),
            Arc::new(HttpDhtTransport::new(Arc::clone(&client))),
            config.dht.clone(),
        )
        .await
        .map_err(NetError::from)?;

        let router = Router::new(
            Arc::clone(&identity),
            contacts.clone(),
            inbox.clone(),
            forward.clone(),
            seen.clone(),
            client.clone(),
        );

        let (shutdown_tx, _) = watch::channel(false);

        info!(
            identifier = identity.identifier().short(),
            dht_id = %dht.local_id(),
            addr = %config.overlay.local_addr,
            "node assembled"
        );

        Ok(Arc::new(Self {
            config,
            identity,
            contacts,
            inbox,
            forward,
            seen,
            router,
            dht,
            client,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The unlocked identity.
    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// This node's identifier.
    pub fn identifier(&self) -> &Identifier {
        self.identity.identifier()
    }

    /// The contact store.
    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    /// The inbox store.
    pub fn inbox(&self) -> &InboxStore {
        &self.inbox
    }

    /// The forward queue.
    pub fn forward_queue(&self) -> &ForwardQueue {
        &self.forward
    }

    /// The seen set.
    pub fn seen(&self) -> &SeenStore {
        &self.seen
    }

    /// The routing engine.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The DHT.
    pub fn dht(&self) -> &Arc<Dht> {
        &self.dht
    }

    /// The overlay HTTP client.
    pub fn client(&self) -> &Arc<OverlayClient> {
        &self.client
    }

    /// Spawn the background loops: DHT maintenance, the seen-set
    /// sweep, and (unless server-only) hourly self-publication.
    pub fn start_background(self: Arc<Self>) {
        let shutdown = self.shutdown_tx.subscribe();
        let mut tasks = self.tasks.lock();

        tasks.extend(Arc::clone(&self.dht).spawn_maintenance(shutdown.clone()));

        {
            let node = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(node.config.seen_sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = node.seen.sweep().await {
                                warn!(error = %e, "seen-set sweep failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        if !self.config.server_only {
            let node = Arc::clone(&self);
            let mut shutdown = shutdown;
            tasks.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(zerotrace_dht::record::REPUBLISH_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match node.publish_self().await {
                                Ok(acks) => debug!(acks, "republished directory record"),
                                Err(e) => debug!(error = %e, "self-publication incomplete"),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }
    }

    /// Bind the configured host/port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is unavailable.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        info!(addr = %listener.local_addr()?, "http server bound");
        Ok(listener)
    }

    /// Serve HTTP on a pre-bound listener until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        let app = create_router(Arc::clone(&self));
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        Ok(())
    }

    /// Bind and serve (the normal runtime path).
    ///
    /// # Errors
    ///
    /// See [`Node::bind`] and [`Node::serve_on`].
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve_on(listener).await
    }

    /// Resolve a recipient: a stored contact, or a directory discovery
    /// that is then stored.
    ///
    /// # Errors
    ///
    /// Returns `NetError::UnknownContact` when neither source knows the
    /// identifier.
    pub async fn resolve_contact(&self, identifier: &Identifier) -> Result<Contact> {
        if let Some(contact) = self.contacts.get(identifier).await.map_err(NetError::from)? {
            return Ok(contact);
        }
        let record = self
            .dht
            .discover(identifier.as_str())
            .await
            .map_err(|_| NetError::UnknownContact(identifier.as_str().to_string()))?;
        let contact = Contact {
            identifier: identifier.clone(),
            name: None,
            addr: record.addr.clone(),
            kem_public_key: record.kem_public_key.clone(),
            sig_public_key: record.sig_public_key.clone(),
        };
        self.contacts.add(&contact).await.map_err(NetError::from)?;
        info!(peer = identifier.short(), "contact discovered via directory");
        Ok(contact)
    }

    /// Encrypt and send a message.
    ///
    /// Tries the recipient's address directly; on failure the message
    /// is queued locally for pull and fanned out through other
    /// contacts, whose acks are awaited and counted.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient cannot be resolved or the
    /// envelope cannot be built.
    pub async fn send_message(
        &self,
        recipient: &Identifier,
        plaintext: &[u8],
    ) -> Result<SendOutcome> {
        let contact = self.resolve_contact(recipient).await?;
        let wire = envelope::seal(
            &self.identity,
            &self.config.overlay.local_addr,
            recipient,
            &contact.kem_public_key,
            plaintext,
        )?;

        // Our own copy must never loop back through us.
        self.seen
            .insert_if_new(&wire.signature)
            .await
            .map_err(NetError::from)?;

        match self.client.deliver(&contact.addr, &wire).await {
            Ok(()) => {
                info!(peer = recipient.short(), "message delivered directly");
                return Ok(SendOutcome::Direct);
            }
            Err(e) => {
                debug!(peer = recipient.short(), error = %e, "direct send failed");
            }
        }

        // Recipient unreachable: keep a pull-able copy, then fan out.
        self.forward.push(&wire).await.map_err(NetError::from)?;

        let own = self.identifier().as_str();
        let eligible: Vec<Contact> = self
            .contacts
            .list()
            .await
            .map_err(NetError::from)?
            .into_iter()
            .filter(|c| c.identifier.as_str() != own && c.identifier != *recipient)
            .collect();
        if eligible.is_empty() {
            return Ok(SendOutcome::Queued);
        }

        let mut sends: JoinSet<bool> = JoinSet::new();
        for index in choose_fanout(&eligible) {
            let addr = eligible[index].addr.clone();
            let wire = wire.clone();
            let client = Arc::clone(&self.client);
            sends.spawn(async move { client.deliver(&addr, &wire).await.is_ok() });
        }
        let mut accepted = 0usize;
        while let Some(result) = sends.join_next().await {
            if matches!(result, Ok(true)) {
                accepted += 1;
            }
        }
        info!(peer = recipient.short(), accepted, "message fanned out");
        Ok(SendOutcome::Fanout { accepted })
    }

    /// Pull messages queued for us at a peer and run them through the
    /// routing engine. Returns how many were fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable.
    pub async fn fetch_inbox_from(&self, addr: &str) -> Result<usize> {
        let messages = self
            .client
            .fetch_messages(addr, self.identifier().as_str())
            .await?;
        let count = messages.len();
        for wire in messages {
            if let Err(e) = self.router.handle_inbound(wire).await {
                warn!(error = %e, "pulled message failed routing");
            }
        }
        Ok(count)
    }

    /// Sign and publish our directory record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be built or replicated.
    pub async fn publish_self(&self) -> Result<usize> {
        let record =
            DirectoryRecord::create(&self.identity, &self.config.overlay.local_addr)
                .map_err(NetError::from)?;
        Ok(self.dht.publish(&record).await.map_err(NetError::from)?)
    }

    /// Join the DHT through a known peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable.
    pub async fn bootstrap(&self, peer: &NodeAddr) -> Result<()> {
        Ok(self.dht.bootstrap(peer).await.map_err(NetError::from)?)
    }

    /// Signal every loop and the HTTP server, then wait for them.
    ///
    /// Forward-queue entries are already durable in SQLite; once tasks
    /// are down the identity drops with the node, zeroizing secrets.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("node shut down");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identifier", self.identity.identifier())
            .field("addr", &self.config.overlay.local_addr)
            .finish_non_exhaustive()
    }
}
