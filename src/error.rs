use thiserror::Error;

/// Local precondition failures of a conversation handle.
///
/// Remote failures never surface here; they become pane notices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("conversation view already released")]
    Released,
    #[error("actor identity is still resolving")]
    ActorPending,
    #[error("no signed-in actor")]
    SignedOut,
    #[error("actor is not a participant of this conversation")]
    Unauthorized,
    #[error("message has neither text nor attachment")]
    EmptyMessage,
}
