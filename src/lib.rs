//! Live synchronization of buyer/supplier conversations, their transcripts and
//! the attached product snapshot or RFQ list, over a push-notifying document
//! store.

pub mod cli_adapter;
pub mod config;
pub mod decode;
pub mod error;
pub mod fixture;
pub mod identity;
pub mod logging;
pub mod memory_store;
pub mod navigation;
pub mod store;
pub mod sync;
pub mod types;
pub mod view;

pub use error::SyncError;
pub use identity::{ActorState, IdentityProvider, IdentityWatch};
pub use memory_store::MemoryStore;
pub use navigation::{ChannelNavigator, Navigator};
pub use store::{DocumentStore, StoreError};
pub use sync::{ConversationHandle, ConversationSync, SyncSettings};
pub use types::{ConversationId, ConversationKind, MessageBody, MissingSnapshot};
pub use view::{Attachment, ConversationView, Notice, Pane};
