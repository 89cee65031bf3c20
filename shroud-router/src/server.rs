//! Router state shared by every connection.
//!
//! The router owns the entity indexes (sessions, clients, groups, transfers),
//! the relay worker pool and the operational counters.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shroud_core::{codec, Entity, EntityListMap, EntityMap, Key, Session};
use shroud_types::{ClientId, Envelope, GroupId, SessionId, StatusCode, TransferId};
use tokio::sync::{watch, Semaphore};

use crate::components::{ClientComponent, TunnelComponent};
use crate::config::Config;
use crate::error::{ProtocolError, ProtocolResult};

/// Operational metrics for monitoring router activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Connections accepted.
    pub connections_total: AtomicU64,
    /// Requests read from client connections.
    pub requests_total: AtomicU64,
    /// Handshakes completed.
    pub handshakes_total: AtomicU64,
    /// Requests relayed down a tunnel.
    pub relayed_total: AtomicU64,
    /// Transfers started.
    pub transfers_total: AtomicU64,
    /// Requests answered with an error status.
    pub errors_total: AtomicU64,
}

impl RouterMetrics {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Log every counter.
    pub fn log(&self, name: &str) {
        tracing::info!(
            router = name,
            connections = self.connections_total.load(Ordering::Relaxed),
            requests = self.requests_total.load(Ordering::Relaxed),
            handshakes = self.handshakes_total.load(Ordering::Relaxed),
            relayed = self.relayed_total.load(Ordering::Relaxed),
            transfers = self.transfers_total.load(Ordering::Relaxed),
            errors = self.errors_total.load(Ordering::Relaxed),
            "router metrics"
        );
    }
}

/// Main router state.
pub struct Router {
    config: Config,
    passphrase: Key,
    sessions: Arc<EntityMap<SessionId>>,
    clients: Arc<EntityMap<ClientId>>,
    groups: Arc<EntityListMap<GroupId>>,
    transfers: Arc<EntityMap<TransferId>>,
    workers: Arc<Semaphore>,
    metrics: RouterMetrics,
    bound: watch::Sender<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("sessions", &self.sessions.len())
            .field("clients", &self.clients.len())
            .field("transfers", &self.transfers.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create router state from configuration.
    pub fn new(config: Config) -> Arc<Self> {
        let passphrase = Key::from_passphrase(&config.server.passphrase);
        let workers = Arc::new(Semaphore::new(config.limits.max_workers.max(1)));
        let (bound, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            passphrase,
            sessions: EntityMap::new("sessions"),
            clients: EntityMap::new("clients"),
            groups: EntityListMap::new("groups"),
            transfers: EntityMap::new("transfers"),
            workers,
            metrics: RouterMetrics::default(),
            bound,
            shutdown,
        })
    }

    /// Router configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key protecting handshake bodies.
    pub fn passphrase(&self) -> &Key {
        &self.passphrase
    }

    /// Operational metrics.
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Sessions by id.
    pub fn sessions(&self) -> &Arc<EntityMap<SessionId>> {
        &self.sessions
    }

    /// Joined clients by client id.
    pub fn clients(&self) -> &Arc<EntityMap<ClientId>> {
        &self.clients
    }

    /// Joined clients by group.
    pub fn groups(&self) -> &Arc<EntityListMap<GroupId>> {
        &self.groups
    }

    /// In-flight transfers.
    pub fn transfers(&self) -> &Arc<EntityMap<TransferId>> {
        &self.transfers
    }

    /// Relay worker pool.
    pub fn workers(&self) -> &Arc<Semaphore> {
        &self.workers
    }

    pub(crate) fn count_connection(&self) {
        RouterMetrics::incr(&self.metrics.connections_total);
    }

    pub(crate) fn count_request(&self) {
        RouterMetrics::incr(&self.metrics.requests_total);
    }

    pub(crate) fn count_handshake(&self) {
        RouterMetrics::incr(&self.metrics.handshakes_total);
    }

    pub(crate) fn count_transfer(&self) {
        RouterMetrics::incr(&self.metrics.transfers_total);
    }

    pub(crate) fn count_error(&self) {
        RouterMetrics::incr(&self.metrics.errors_total);
    }

    /// Entity of a live session.
    pub fn session_entity(&self, id: &SessionId) -> ProtocolResult<Arc<Entity>> {
        self.sessions
            .get(id)
            .filter(|e| !e.is_shutdown())
            .ok_or(ProtocolError::UnknownSession)
    }

    /// Entity of a joined client that is reachable through a tunnel.
    pub fn reachable(&self, id: &ClientId) -> ProtocolResult<Arc<Entity>> {
        self.clients
            .get(id)
            .filter(|e| !e.is_shutdown() && e.has::<TunnelComponent>())
            .ok_or_else(|| ProtocolError::ClientNotFound(id.to_string()))
    }

    /// Joined members of `group` other than `exclude`.
    pub fn members(&self, group: &GroupId, exclude: &ClientId) -> Vec<Arc<Entity>> {
        self.groups
            .get(group)
            .into_iter()
            .filter(|e| !e.is_shutdown())
            .filter(|e| {
                e.get::<ClientComponent>()
                    .is_some_and(|c| &c.id != exclude)
            })
            .collect()
    }

    /// Issue `envelope` as a request down `target`'s tunnel and wait for the reply.
    ///
    /// A tunnel that fails is treated as a departed client: the entity is shut
    /// down, which removes it from every index.
    pub async fn relay(
        &self,
        target: &Arc<Entity>,
        envelope: &Envelope,
    ) -> ProtocolResult<(StatusCode, Option<Envelope>)> {
        let client = target.require::<ClientComponent>()?;
        let tunnel = target
            .get::<TunnelComponent>()
            .ok_or_else(|| ProtocolError::ClientNotFound(client.id.to_string()))?;
        let session = target.require::<Session>()?;

        let request = codec::request(&session.id, envelope, &session.key)?;
        RouterMetrics::incr(&self.metrics.relayed_total);
        tracing::debug!(
            target = %client.id,
            kind = ?envelope.kind,
            id = envelope.id.as_deref().unwrap_or(""),
            "relay"
        );

        let response = match tunnel.transport().exchange(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(target = %client.id, error = %e, "tunnel failed, dropping client");
                target.shutdown();
                return Err(ProtocolError::ClientNotFound(client.id.to_string()));
            }
        };

        target.update();
        let reply = codec::open_response(&response, &session.key)?;
        tracing::debug!(target = %client.id, status = %response.status, "relay reply");
        Ok((response.status, reply))
    }

    /// Record the bound listener address.
    pub(crate) fn set_bound(&self, address: Option<SocketAddr>) {
        self.bound.send_replace(address);
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.subscribe();
        let address = match bound.wait_for(|a| a.is_some()).await {
            Ok(address) => *address,
            Err(_) => None,
        };
        address
    }

    /// Ask every accept loop and connection to stop.
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Clear a previous shutdown request before listening again.
    pub(crate) fn reset_shutdown(&self) {
        self.shutdown.send_replace(false);
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Drop every session, client and transfer.
    pub fn clear(&self) {
        for entity in self.sessions.entities() {
            entity.shutdown();
        }
        for entity in self.transfers.entities() {
            entity.shutdown();
        }
        self.sessions.clear();
        self.clients.clear();
        self.groups.clear();
        self.transfers.clear();
    }
}
