//! Machine states, status and the pending-state queue.
//!
//! This module is pure data. The worker that drains the queue lives in
//! [`machine`](crate::machine).

use std::collections::VecDeque;
use std::fmt;

/// A state a machine can be asked to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Terminal: the worker exits.
    None,
    /// Validate configuration and reset per-run state.
    Init,
    /// Open a connection.
    Connect,
    /// Obtain a session.
    Handshake,
    /// Announce identity and group.
    Join,
    /// Hand the connection to the router for inbound work.
    Tunnel,
    /// Serve inbound commands.
    Listen,
    /// Run a search.
    Search,
    /// Step a download.
    Download,
    /// Step an upload.
    Upload,
    /// Disconnect and re-enter `Init` after a delay.
    Restart,
    /// Stop for good.
    Shutdown,
    /// Waiting on a timer.
    Sleep,
}

impl State {
    /// Reset transitions jump ahead of anything already queued.
    pub fn preempts(self) -> bool {
        matches!(self, State::Init | State::Restart)
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            State::None => "none",
            State::Init => "init",
            State::Connect => "connect",
            State::Handshake => "handshake",
            State::Join => "join",
            State::Tunnel => "tunnel",
            State::Listen => "listen",
            State::Search => "search",
            State::Download => "download",
            State::Upload => "upload",
            State::Restart => "restart",
            State::Shutdown => "shutdown",
            State::Sleep => "sleep",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible outcome of the last step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing reported yet.
    #[default]
    None,
    /// Working.
    Info,
    /// Completed successfully.
    Success,
    /// Recoverable problem, usually configuration.
    Warning,
    /// Failed.
    Error,
    /// Stopped on request.
    Cancelled,
    /// Paused on request.
    Paused,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::None => "none",
            Status::Info => "info",
            Status::Success => "success",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
            Status::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Double-ended queue of pending states.
///
/// Priority is decided by the state's tag alone: `Init` and `Restart` (see
/// [`State::preempts`]) go to the front, every other state is appended. Two
/// preempting pushes run newest first.
#[derive(Debug, Clone, Default)]
pub struct StateQueue {
    pending: VecDeque<State>,
}

impl StateQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transition.
    pub fn push(&mut self, state: State) {
        if state.preempts() {
            self.pending.push_front(state);
        } else {
            self.pending.push_back(state);
        }
    }

    /// Next state to run.
    pub fn pop(&mut self) -> Option<State> {
        self.pending.pop_front()
    }

    /// Next state without removing it.
    pub fn peek(&self) -> Option<State> {
        self.pending.front().copied()
    }

    /// Drop everything pending.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pending count.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
