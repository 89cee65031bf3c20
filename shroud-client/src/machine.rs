//! Client lifecycle against one router.
//!
//! `Init → Handshake → Join → Tunnel → Listen`. Listen answers relayed
//! requests on the tunnel and pings the router to keep the session alive;
//! when the tunnel drops, the machine restarts. A configuration fault
//! (unreadable artifact, bad address) restarts with Warning status and is
//! retried until fixed.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use shroud_core::{Group, Key, Machine, State, StateHandler, Status, StreamTransport, Transport};
use tokio::sync::watch;

use crate::commands::Client;
use crate::config::RouterEntry;
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::link::Link;
use crate::responder::Responder;

#[derive(Default)]
struct Slots {
    group: Option<Group>,
    link: Option<Link>,
    tunnel: Option<Link>,
}

/// State handler driving one client connection.
pub struct ClientMachine {
    entry: RouterEntry,
    context: ClientContext,
    slots: Mutex<Slots>,
    client: watch::Sender<Option<Arc<Client>>>,
    stopping: watch::Sender<bool>,
}

impl ClientMachine {
    /// Handler for `entry`.
    pub fn new(entry: RouterEntry, context: ClientContext) -> Self {
        let (client, _) = watch::channel(None);
        let (stopping, _) = watch::channel(false);
        Self {
            entry,
            context,
            slots: Mutex::new(Slots::default()),
            client,
            stopping,
        }
    }

    /// The joined client while listening.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.borrow().clone()
    }

    /// Watch the joined client come and go.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Client>>> {
        self.client.subscribe()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let endpoint = self.entry.endpoint();
        let transport = StreamTransport::connect(&endpoint).await?;
        Ok(Arc::new(transport))
    }

    fn init(&self, machine: &Arc<Machine>) -> Result<()> {
        let artifact = self.entry.load_artifact()?;
        let group = Group::from_artifact(&artifact);
        tracing::info!(router = %self.entry.endpoint(), group = %group.id, "client starting");
        self.slots().group = Some(group);
        machine.set_state(State::Handshake);
        Ok(())
    }

    async fn handshake(&self, machine: &Arc<Machine>) -> Result<()> {
        let transport = self.connect().await?;
        let passphrase = Key::from_passphrase(&self.entry.passphrase);
        let link = Link::handshake(transport, &passphrase).await?;
        self.slots().link = Some(link);
        machine.set_state(State::Join);
        Ok(())
    }

    async fn join(&self, machine: &Arc<Machine>) -> Result<()> {
        let (link, group) = {
            let mut slots = self.slots();
            (slots.link.take(), slots.group.clone())
        };
        let (Some(link), Some(group)) = (link, group) else {
            return Err(ClientError::NotConnected);
        };
        let client = Client::join(link, self.context.id.clone(), &self.context.name, group).await?;
        self.client.send_replace(Some(Arc::new(client)));
        machine.set_state(State::Tunnel);
        Ok(())
    }

    async fn tunnel(&self, machine: &Arc<Machine>) -> Result<()> {
        let client = self.client().ok_or(ClientError::NotConnected)?;
        let transport = self.connect().await?;
        let tunnel = client.open_tunnel(transport).await?;
        self.slots().tunnel = Some(tunnel);
        machine.set_status(Status::Success);
        machine.set_state(State::Listen);
        Ok(())
    }

    async fn listen(&self) -> Result<()> {
        let client = self.client().ok_or(ClientError::NotConnected)?;
        let tunnel = self.slots().tunnel.clone().ok_or(ClientError::NotConnected)?;
        let responder = Responder::new(self.context.clone(), client.group().clone());
        let mut stopping = self.stopping.subscribe();

        let served = tokio::select! {
            served = responder.serve(&tunnel) => served,
            pinged = keep_alive(&client, self.context.timeouts.ping()) => pinged,
            _ = stopping.wait_for(|stop| *stop) => return Ok(()),
        };
        served?;
        if self.is_stopping() {
            return Ok(());
        }
        Err(ClientError::protocol("tunnel closed by router"))
    }

    async fn disconnect(&self) {
        let client = self.client.send_replace(None);
        let (link, tunnel) = {
            let mut slots = self.slots();
            (slots.link.take(), slots.tunnel.take())
        };
        if let Some(client) = client {
            client.link().close().await;
        }
        for link in [link, tunnel].into_iter().flatten() {
            link.close().await;
        }
    }
}

async fn keep_alive(client: &Client, every: std::time::Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        client.ping().await?;
        tracing::trace!(client = %client.id(), "ping");
    }
}

#[async_trait]
impl StateHandler for ClientMachine {
    type Error = ClientError;

    async fn on_state(&self, state: State, machine: &Arc<Machine>) -> Result<()> {
        match state {
            State::Init => self.init(machine),
            State::Handshake => self.handshake(machine).await,
            State::Join => self.join(machine).await,
            State::Tunnel => self.tunnel(machine).await,
            State::Listen => self.listen().await,
            State::Restart => {
                self.disconnect().await;
                tracing::info!(router = %self.entry.endpoint(), delay = ?machine.restart_delay(), "reconnecting");
                Ok(())
            }
            State::Shutdown => {
                if let Some(client) = self.client() {
                    if let Err(e) = client.quit().await {
                        tracing::debug!("quit failed: {}", e);
                    }
                }
                self.disconnect().await;
                machine.set_status(Status::Cancelled);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_error(&self, state: State, error: &ClientError, machine: &Arc<Machine>) {
        if matches!(error, ClientError::Config(_)) {
            tracing::warn!(router = %self.entry.endpoint(), %error, "client configuration invalid");
            machine.set_status(Status::Warning);
        } else {
            tracing::warn!(router = %self.entry.endpoint(), %state, %error, "client state failed");
            machine.set_status(Status::Error);
        }
        if self.is_stopping() || matches!(state, State::Restart | State::Shutdown) {
            return;
        }
        machine.set_state(State::Restart);
    }
}

/// A client machine for one router entry.
pub struct ClientService {
    handler: Arc<ClientMachine>,
    machine: Arc<Machine>,
}

impl ClientService {
    /// Service for `entry`, not yet started.
    pub fn new(entry: RouterEntry, context: ClientContext) -> Self {
        let name = format!("client:{}", entry.endpoint());
        let restart = context.timeouts.restart();
        let handler = Arc::new(ClientMachine::new(entry, context));
        let machine = Machine::with_timing(name, restart, shroud_core::DEFAULT_HEARTBEAT);
        Self { handler, machine }
    }

    /// Lifecycle machine.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// The joined client while listening.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.handler.client()
    }

    /// Connect and keep reconnecting until stopped.
    pub fn start(&self) {
        self.handler.stopping.send_replace(false);
        self.machine.start(self.handler.clone());
    }

    /// Wait until the client has joined and opened its tunnel.
    ///
    /// Returns `None` if it disconnected again before this call observed it.
    pub async fn ready(&self) -> Option<Arc<Client>> {
        let mut status = self.machine.subscribe();
        status.wait_for(|s| *s == Status::Success).await.ok()?;
        self.client()
    }

    /// Quit, disconnect and end the machine.
    pub fn stop(&self) {
        self.handler.stopping.send_replace(true);
        self.machine.stop();
    }

    /// Wait for the machine to finish.
    pub async fn join(&self) {
        self.machine.join().await;
    }
}
