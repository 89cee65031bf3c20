//! State machine driver.
//!
//! A [`Machine`] owns a [`StateQueue`] and one background task that pops the
//! next state, hands it to a [`StateHandler`], yields, and repeats until the
//! terminal [`State::None`] or [`State::Shutdown`].
//!
//! - `Init` and `Restart` jump ahead of queued states
//! - `Restart` runs the handler (to disconnect) and then sleeps for the
//!   restart delay before re-entering `Init`
//! - [`Machine::sleep`] ignores further calls until the pending one fires
//! - [`Machine::pause`] freezes dispatch without dropping queued states; the
//!   handler's `on_paused` heartbeat runs instead
//! - A handler error goes to `on_error`, which by default reports
//!   [`Status::Error`] and queues `Restart`

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::state::{State, StateQueue, Status};

/// Default delay between `Restart` and the following `Init`.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Default interval of the paused heartbeat.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);

/// Per-state behavior plugged into a [`Machine`].
#[async_trait]
pub trait StateHandler: Send + Sync + 'static {
    /// Error a state handler can fail with.
    type Error: fmt::Display + Send + Sync + 'static;

    /// Run one state.
    async fn on_state(&self, state: State, machine: &Arc<Machine>) -> Result<(), Self::Error>;

    /// Heartbeat while paused.
    async fn on_paused(&self, _machine: &Arc<Machine>) {}

    /// Failure policy. Defaults to reporting an error and restarting.
    async fn on_error(&self, state: State, error: &Self::Error, machine: &Arc<Machine>) {
        tracing::warn!(machine = machine.name(), %state, %error, "state failed");
        machine.set_status(Status::Error);
        if !matches!(state, State::Restart | State::Shutdown) {
            machine.set_state(State::Restart);
        }
    }
}

type Launcher = Arc<dyn Fn(Arc<Machine>) -> JoinHandle<()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    queue: StateQueue,
    current: Option<State>,
    paused: bool,
    sleeping: bool,
    sleeper: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    launcher: Option<Launcher>,
}

enum Next {
    Run(State),
    Wait { paused: bool },
}

/// Queue-driven state machine with one worker task.
pub struct Machine {
    name: String,
    restart_delay: Duration,
    heartbeat: Duration,
    inner: Mutex<Inner>,
    wake: Notify,
    status: watch::Sender<Status>,
    weak_self: Weak<Machine>,
}

impl Machine {
    /// Machine with default timing.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_timing(name, DEFAULT_RESTART_DELAY, DEFAULT_HEARTBEAT)
    }

    /// Machine with explicit restart delay and paused heartbeat.
    pub fn with_timing(
        name: impl Into<String>,
        restart_delay: Duration,
        heartbeat: Duration,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(Status::None);
        Arc::new_cyclic(|weak| Machine {
            name: name.into(),
            restart_delay,
            heartbeat,
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
            status,
            weak_self: weak.clone(),
        })
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay between `Restart` and `Init`.
    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// Spawn the worker with `handler` and queue `Init`.
    ///
    /// A running worker is replaced.
    pub fn start<H: StateHandler>(self: &Arc<Self>, handler: Arc<H>) {
        let launcher: Launcher = Arc::new(move |machine: Arc<Machine>| {
            let handler = handler.clone();
            tokio::spawn(async move { machine.run(handler).await })
        });
        self.inner().launcher = Some(launcher);
        self.launch();
    }

    /// Queue `Restart`, or relaunch from `Init` when the worker has stopped.
    pub fn restart(self: &Arc<Self>) {
        if self.is_running() {
            self.set_state(State::Restart);
        } else {
            self.launch();
        }
    }

    /// Drop pending states and queue `Shutdown`.
    pub fn stop(&self) {
        {
            let mut inner = self.inner();
            inner.queue.clear();
            inner.paused = false;
            inner.sleeping = false;
            if let Some(sleeper) = inner.sleeper.take() {
                sleeper.abort();
            }
            inner.queue.push(State::Shutdown);
        }
        self.wake.notify_one();
    }

    /// Queue a transition.
    pub fn set_state(&self, state: State) {
        self.inner().queue.push(state);
        self.wake.notify_one();
    }

    /// Drop pending states and let the worker exit.
    pub fn finish(&self) {
        {
            let mut inner = self.inner();
            inner.queue.clear();
            inner.queue.push(State::None);
        }
        self.wake.notify_one();
    }

    /// Queue `resume` after `duration`.
    ///
    /// Returns false, and does nothing, while another sleep is pending.
    pub fn sleep(&self, duration: Duration, resume: State) -> bool {
        let mut inner = self.inner();
        if inner.sleeping {
            return false;
        }
        inner.sleeping = true;
        inner.current = Some(State::Sleep);

        let weak = self.weak_self.clone();
        inner.sleeper = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(machine) = weak.upgrade() {
                machine.wake_from_sleep(resume);
            }
        }));
        true
    }

    /// True while a sleep is pending.
    pub fn is_sleeping(&self) -> bool {
        self.inner().sleeping
    }

    /// Freeze dispatch.
    pub fn pause(&self) {
        self.inner().paused = true;
        self.set_status(Status::Paused);
        self.wake.notify_one();
    }

    /// Continue dispatch.
    pub fn resume(&self) {
        self.inner().paused = false;
        self.set_status(Status::Info);
        self.wake.notify_one();
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.inner().paused
    }

    /// State most recently entered.
    pub fn state(&self) -> State {
        self.inner().current.unwrap_or(State::None)
    }

    /// Number of queued states.
    pub fn pending(&self) -> usize {
        self.inner().queue.len()
    }

    /// Last reported status.
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Report a status.
    pub fn set_status(&self, status: Status) {
        self.status.send_replace(status);
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// True while the worker task is alive.
    pub fn is_running(&self) -> bool {
        self.inner()
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Wait for the worker to exit.
    pub async fn join(&self) {
        let worker = self.inner().worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(self: &Arc<Self>) {
        let launcher = {
            let mut inner = self.inner();
            if let Some(worker) = inner.worker.take() {
                worker.abort();
            }
            if let Some(sleeper) = inner.sleeper.take() {
                sleeper.abort();
            }
            inner.queue.clear();
            inner.paused = false;
            inner.sleeping = false;
            inner.current = None;
            inner.queue.push(State::Init);
            inner.launcher.clone()
        };

        let Some(launcher) = launcher else {
            tracing::warn!(machine = %self.name, "launch without a handler");
            return;
        };
        self.set_status(Status::Info);
        let worker = launcher(self.clone());
        self.inner().worker = Some(worker);
    }

    fn wake_from_sleep(&self, resume: State) {
        {
            let mut inner = self.inner();
            inner.sleeping = false;
            inner.sleeper = None;
            inner.queue.push(resume);
        }
        self.wake.notify_one();
    }

    fn next(&self) -> Next {
        let mut inner = self.inner();
        if inner.paused {
            return Next::Wait { paused: true };
        }
        match inner.queue.pop() {
            Some(state) => Next::Run(state),
            None => Next::Wait { paused: false },
        }
    }

    async fn run<H: StateHandler>(self: Arc<Self>, handler: Arc<H>) {
        tracing::debug!(machine = %self.name, "worker started");
        loop {
            match self.next() {
                Next::Run(State::None) => break,
                Next::Run(state) => {
                    self.dispatch(handler.as_ref(), state).await;
                    if state == State::Shutdown {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                Next::Wait { paused: true } => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.heartbeat) => handler.on_paused(&self).await,
                    }
                }
                Next::Wait { paused: false } => self.wake.notified().await,
            }
        }
        self.inner().current = Some(State::None);
        tracing::debug!(machine = %self.name, "worker stopped");
    }

    async fn dispatch<H: StateHandler>(self: &Arc<Self>, handler: &H, state: State) {
        self.inner().current = Some(state);
        tracing::trace!(machine = %self.name, %state, "enter");

        if let Err(error) = handler.on_state(state, self).await {
            handler.on_error(state, &error, self).await;
        }
        if state == State::Restart {
            self.sleep(self.restart_delay, State::Init);
        }
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}
