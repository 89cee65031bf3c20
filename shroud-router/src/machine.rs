//! Router lifecycle: bind, accept, shut down.
//!
//! `Init` binds the listener (a bind failure is a configuration fault:
//! Warning status and a delayed retry), `Listen` accepts connections until
//! the router is told to stop, `Restart` drops the listener and every
//! session, `Shutdown` does the same and logs metrics.

use std::sync::Arc;

use async_trait::async_trait;
use shroud_core::{Machine, State, StateHandler, Status, StreamTransport, Transport};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::error::RouterError;
use crate::server::Router;
use crate::session::Connection;

/// State handler driving one router.
pub struct RouterMachine {
    router: Arc<Router>,
    listener: Mutex<Option<TcpListener>>,
}

impl RouterMachine {
    /// Handler for `router`.
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            listener: Mutex::new(None),
        }
    }

    async fn bind(&self, machine: &Arc<Machine>) -> Result<(), RouterError> {
        let address = &self.router.config().server.bind_address;
        let listener = TcpListener::bind(address).await?;
        let local = listener.local_addr()?;
        *self.listener.lock().await = Some(listener);
        self.router.set_bound(Some(local));
        tracing::info!(router = %self.router.config().server.name, %local, "listening");
        machine.set_status(Status::Success);
        machine.set_state(State::Listen);
        Ok(())
    }

    async fn listen(&self) -> Result<(), RouterError> {
        let Some(listener) = self.listener.lock().await.take() else {
            return Ok(());
        };
        let max_body = self.router.config().limits.max_body_bytes;
        let mut stop = self.router.shutdown_signal();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.wait_for(|stop| *stop) => break,
            };
            let (stream, peer) = accepted?;
            let _ = stream.set_nodelay(true);

            let transport: Arc<dyn Transport> = Arc::new(
                StreamTransport::from_stream(stream, peer.to_string()).with_max_body(max_body),
            );
            tokio::spawn(Connection::new(self.router.clone(), transport).run());
        }
        Ok(())
    }

    async fn release(&self) {
        self.listener.lock().await.take();
        self.router.set_bound(None);
        self.router.clear();
    }
}

#[async_trait]
impl StateHandler for RouterMachine {
    type Error = RouterError;

    async fn on_state(&self, state: State, machine: &Arc<Machine>) -> Result<(), RouterError> {
        match state {
            State::Init => self.bind(machine).await,
            State::Listen => self.listen().await,
            State::Restart => {
                tracing::info!(delay = ?machine.restart_delay(), "router restarting");
                self.release().await;
                Ok(())
            }
            State::Shutdown => {
                self.router.signal_shutdown();
                self.release().await;
                self.router.metrics().log(&self.router.config().server.name);
                machine.set_status(Status::Cancelled);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_error(&self, state: State, error: &RouterError, machine: &Arc<Machine>) {
        if state == State::Init {
            tracing::warn!(
                address = %self.router.config().server.bind_address,
                %error,
                "bind failed"
            );
            machine.set_status(Status::Warning);
        } else {
            tracing::error!(%state, %error, "router state failed");
            machine.set_status(Status::Error);
        }
        if !matches!(state, State::Restart | State::Shutdown) {
            machine.set_state(State::Restart);
        }
    }
}

/// A router with its lifecycle machine.
pub struct RouterService {
    router: Arc<Router>,
    machine: Arc<Machine>,
}

impl RouterService {
    /// Router for `config`, not yet started.
    pub fn new(config: crate::config::Config) -> Self {
        let restart = config.timeouts.restart();
        let router = Router::new(config);
        let machine = Machine::with_timing("router", restart, shroud_core::DEFAULT_HEARTBEAT);
        Self { router, machine }
    }

    /// Shared router state.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Lifecycle machine.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Bind and start accepting.
    pub fn start(&self) {
        self.router.reset_shutdown();
        self.machine
            .start(Arc::new(RouterMachine::new(self.router.clone())));
    }

    /// Stop accepting, drop every client and end the machine.
    pub fn stop(&self) {
        self.router.signal_shutdown();
        self.machine.stop();
    }

    /// Wait for the machine to finish.
    pub async fn join(&self) {
        self.machine.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn loopback() -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn binds_and_stops() {
        let service = RouterService::new(loopback());
        service.start();
        let address = service.router().wait_bound().await.unwrap();
        assert_ne!(address.port(), 0);
        assert_eq!(service.machine().status(), Status::Success);

        service.stop();
        tokio::time::timeout(Duration::from_secs(5), service.join())
            .await
            .unwrap();
        assert_eq!(service.router().local_addr(), None);
        assert_eq!(service.machine().status(), Status::Cancelled);
    }

    #[tokio::test]
    async fn accepts_tcp_connections() {
        let service = RouterService::new(loopback());
        service.start();
        let address = service.router().wait_bound().await.unwrap();

        let _client = StreamTransport::connect(&address.to_string()).await.unwrap();
        for _ in 0..100 {
            if service
                .router()
                .metrics()
                .connections_total
                .load(std::sync::atomic::Ordering::Relaxed)
                == 1
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            service
                .router()
                .metrics()
                .connections_total
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        service.stop();
        service.join().await;
    }

    #[tokio::test]
    async fn bind_failure_warns_and_retries() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.server.bind_address = taken.local_addr().unwrap().to_string();
        config.timeouts.restart_secs = 0;

        let service = RouterService::new(config);
        let mut status = service.machine().subscribe();
        service.start();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == Status::Warning),
        )
        .await
        .unwrap()
        .unwrap();

        drop(taken);
        tokio::time::timeout(Duration::from_secs(5), service.router().wait_bound())
            .await
            .unwrap();
        service.stop();
        service.join().await;
    }
}
