use crate::types::ActorId;
use tokio::sync::watch;

/// The current actor as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorState {
    /// Still resolving; authorization must not be decided yet.
    Pending,
    SignedOut,
    Resolved(ActorId),
}

impl ActorState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ActorState::Pending)
    }

    pub fn actor_id(&self) -> Option<&ActorId> {
        match self {
            ActorState::Resolved(id) => Some(id),
            _ => None,
        }
    }
}

/// Owning side of the current-actor context.
pub struct IdentityProvider {
    tx: watch::Sender<ActorState>,
}

impl IdentityProvider {
    pub fn new(initial: ActorState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn pending() -> Self {
        Self::new(ActorState::Pending)
    }

    pub fn resolved(id: impl Into<ActorId>) -> Self {
        Self::new(ActorState::Resolved(id.into()))
    }

    pub fn watch(&self) -> IdentityWatch {
        IdentityWatch {
            rx: self.tx.subscribe(),
        }
    }

    pub fn set(&self, state: ActorState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub fn resolve(&self, id: impl Into<ActorId>) {
        self.set(ActorState::Resolved(id.into()));
    }

    pub fn sign_out(&self) {
        self.set(ActorState::SignedOut);
    }
}

/// Read side handed to a conversation view.
#[derive(Clone)]
pub struct IdentityWatch {
    rx: watch::Receiver<ActorState>,
}

impl IdentityWatch {
    /// A context that never changes, for callers that resolved identity up front.
    pub fn fixed(state: ActorState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    pub fn current(&self) -> ActorState {
        self.rx.borrow().clone()
    }

    /// Waits for the next change. `false` once the provider is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub(crate) fn mark_seen(&mut self) -> ActorState {
        self.rx.borrow_and_update().clone()
    }
}
