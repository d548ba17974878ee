//! Peer roles and the lifecycle state machine.
//!
//! ```text
//!                 +--------------+
//!   Active ---->  |  Connecting  | <-----------+
//!                 +--------------+             |
//!                   |          |               |
//!                   v          v               |
//!   Passive --> +-----------+  +--------------+
//!   Listening   | Connected |->| Reconnecting |  (Active only)
//!               +-----------+  +--------------+
//!                     |
//!   any non-terminal  v
//!            +------------------+      +-----------+
//!            | DestroyRequested | ---> | Destroyed |
//!            +------------------+      +-----------+
//! ```
//!
//! `Destroyed` is reached only through [`Lifecycle::confirm_closed`], which
//! the owning task calls after its socket is gone.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerRole {
    /// Outbound connection initiated by this process.
    Active,
    /// Inbound connection accepted by a listener.
    Passive,
    /// Accepting socket.
    Listening,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerRole::Active => "active",
            PeerRole::Passive => "passive",
            PeerRole::Listening => "listening",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Reconnecting,
    Connected,
    DestroyRequested,
    Destroyed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Destroyed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Result of a destroy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// First request; teardown begins.
    Requested,
    /// Teardown already under way.
    AlreadyRequested,
    /// Teardown under way and now forced to skip the flush.
    Escalated,
    AlreadyDestroyed,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    role: PeerRole,
    state: LifecycleState,
    destroy_now: bool,
}

impl Lifecycle {
    pub fn new(role: PeerRole) -> Self {
        let state = match role {
            PeerRole::Active => LifecycleState::Connecting,
            PeerRole::Passive | PeerRole::Listening => LifecycleState::Connected,
        };
        Self {
            role,
            state,
            destroy_now: false,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether teardown has started.
    pub fn is_closing(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::DestroyRequested | LifecycleState::Destroyed
        )
    }

    /// Whether queued frames should be dropped instead of flushed.
    pub fn destroy_now(&self) -> bool {
        self.destroy_now
    }

    /// Move between the connection states. Destroy states are entered only
    /// through [`Lifecycle::request_destroy`] and [`Lifecycle::confirm_closed`].
    pub fn transition(&mut self, to: LifecycleState) -> Result<(), InvalidTransition> {
        use LifecycleState::*;

        let allowed = match (self.state, to) {
            (Connecting, Connected) => true,
            (Connecting, Reconnecting) | (Reconnecting, Connecting) | (Connected, Reconnecting) => {
                self.role == PeerRole::Active
            }
            _ => false,
        };

        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn request_destroy(&mut self, now: bool) -> DestroyOutcome {
        match self.state {
            LifecycleState::Destroyed => DestroyOutcome::AlreadyDestroyed,
            LifecycleState::DestroyRequested => {
                if now && !self.destroy_now {
                    self.destroy_now = true;
                    DestroyOutcome::Escalated
                } else {
                    DestroyOutcome::AlreadyRequested
                }
            }
            _ => {
                self.state = LifecycleState::DestroyRequested;
                self.destroy_now = now;
                DestroyOutcome::Requested
            }
        }
    }

    /// Record that the socket is closed. Returns `true` exactly once.
    pub fn confirm_closed(&mut self) -> bool {
        if self.state == LifecycleState::Destroyed {
            return false;
        }
        self.state = LifecycleState::Destroyed;
        true
    }
}
