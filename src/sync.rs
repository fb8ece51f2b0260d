//! Live view of one buyer/supplier conversation.
//!
//! Each open view runs one task that owns the view state. The task reacts to
//! four sources: the conversation watch, the attachment watch (product
//! snapshot or RFQ query), identity changes, and commands from the handle.
//! Every store notification replaces its slice of the view wholesale.

use crate::config::Config;
use crate::decode;
use crate::error::SyncError;
use crate::identity::{ActorState, IdentityWatch};
use crate::navigation::Navigator;
use crate::store::{Document, DocumentStore, Predicate, Row, StoreError, StoreEvent, Subscription};
use crate::types::{
    ActorId, ConversationId, ConversationKind, Message, MessageBody, MissingSnapshot, Participants,
};
use crate::view::{Attachment, ConversationView, Notice, Pane};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub conversations: String,
    pub snapshots: String,
    pub rfqs: String,
    pub transcript_field: String,
    pub unauthorized_redirect: String,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            conversations: config.collections.conversations.clone(),
            snapshots: config.collections.snapshots.clone(),
            rfqs: config.collections.rfqs.clone(),
            transcript_field: config.collections.transcript_field.clone(),
            unauthorized_redirect: config.navigation.unauthorized_redirect.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Opens conversation views against one store and navigator.
pub struct ConversationSync {
    store: Arc<dyn DocumentStore>,
    navigator: Arc<dyn Navigator>,
    settings: Arc<SyncSettings>,
}

impl ConversationSync {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        navigator: Arc<dyn Navigator>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            navigator,
            settings: Arc::new(settings),
        }
    }

    /// Starts the live view. Must be called from within a tokio runtime.
    pub fn open(
        &self,
        id: ConversationId,
        kind: ConversationKind,
        identity: IdentityWatch,
    ) -> ConversationHandle {
        let view = ConversationView::new(kind);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Release::default());

        info!(conversation = %id, ?kind, "opening conversation view");
        let worker = Worker {
            id: id.clone(),
            kind,
            store: Arc::clone(&self.store),
            navigator: Arc::clone(&self.navigator),
            settings: Arc::clone(&self.settings),
            identity: identity.clone(),
            view,
            view_tx,
            commands: commands_rx,
            commands_tx: commands_tx.clone(),
            release: Arc::clone(&release),
            redirected_for: None,
            rfq_pair: None,
        };
        let task = tokio::spawn(worker.run());

        ConversationHandle {
            id,
            view: view_rx,
            identity,
            commands: commands_tx,
            release,
            task: Some(task),
        }
    }
}

/// Release flag shared by the handle and the task. Every view mutation is
/// made while holding the lock, so nothing lands after `release` returns.
#[derive(Default)]
struct Release {
    released: Mutex<bool>,
    notify: Notify,
}

impl Release {
    /// `true` on the first call only.
    fn release(&self) -> bool {
        {
            let mut released = self.lock();
            if *released {
                return false;
            }
            *released = true;
        }
        self.notify.notify_one();
        true
    }

    fn is_released(&self) -> bool {
        *self.lock()
    }

    /// Held for the duration of one mutation; `None` once released.
    fn hold(&self) -> Option<MutexGuard<'_, bool>> {
        let guard = self.lock();
        if *guard { None } else { Some(guard) }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Command {
    Send(Message),
    AppendFailed(StoreError),
}

/// Caller side of an open conversation view. Dropping it releases the view.
pub struct ConversationHandle {
    id: ConversationId,
    view: watch::Receiver<ConversationView>,
    identity: IdentityWatch,
    commands: mpsc::UnboundedSender<Command>,
    release: Arc<Release>,
    task: Option<JoinHandle<()>>,
}

impl ConversationHandle {
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Receiver for the rendering layer. Closes once the view is released.
    pub fn view(&self) -> watch::Receiver<ConversationView> {
        self.view.clone()
    }

    pub fn current(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    /// Appends a message as the current actor.
    ///
    /// Only local preconditions are reported here. The message shows up in
    /// the transcript right away but the next store notification is
    /// authoritative; a failed append becomes a transcript notice.
    pub fn send(&self, body: MessageBody) -> Result<(), SyncError> {
        if self.release.is_released() {
            return Err(SyncError::Released);
        }
        if body.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let sender_id = match self.identity.current() {
            ActorState::Pending => return Err(SyncError::ActorPending),
            ActorState::SignedOut => return Err(SyncError::SignedOut),
            ActorState::Resolved(id) => id,
        };
        if self.view.borrow().is_authorized != Some(true) {
            return Err(SyncError::Unauthorized);
        }
        let message = Message {
            sender_id,
            body,
            sent_at: Utc::now(),
        };
        self.commands
            .send(Command::Send(message))
            .map_err(|_| SyncError::Released)
    }

    /// Releases both store watches. Idempotent.
    pub fn close(&self) {
        if self.release.release() {
            info!(conversation = %self.id, "conversation view released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_released()
    }

    /// Releases the view and waits for its task to wind down.
    pub async fn closed(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(conversation = %self.id, "conversation task failed: {err}");
            }
        }
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    id: ConversationId,
    kind: ConversationKind,
    store: Arc<dyn DocumentStore>,
    navigator: Arc<dyn Navigator>,
    settings: Arc<SyncSettings>,
    identity: IdentityWatch,
    view: ConversationView,
    view_tx: watch::Sender<ConversationView>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_tx: mpsc::UnboundedSender<Command>,
    release: Arc<Release>,
    /// Actor context that was already redirected away; `Some(None)` for a
    /// signed-out actor.
    redirected_for: Option<Option<ActorId>>,
    rfq_pair: Option<Participants>,
}

async fn next_event<T>(sub: &mut Option<Subscription<T>>) -> Option<StoreEvent<T>> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

fn into_result<T>(event: StoreEvent<T>) -> Result<T, StoreError> {
    match event {
        StoreEvent::Changed(value) => Ok(value),
        StoreEvent::Failed(err) => Err(err),
    }
}

fn notice_for(err: &StoreError, pane: Pane) -> Notice {
    match err {
        StoreError::Missing { .. } => Notice::not_found(pane),
        StoreError::Transport(reason) => Notice::connection_error(reason.clone()),
    }
}

impl Worker {
    async fn run(mut self) {
        self.identity.mark_seen();
        self.load_initial().await;

        let settings = Arc::clone(&self.settings);
        let mut conversation_sub = self
            .watch_document(&settings.conversations, Pane::Transcript)
            .await;
        let mut snapshot_sub = match self.kind {
            ConversationKind::Product { .. } => {
                self.watch_document(&settings.snapshots, Pane::Attachment)
                    .await
            }
            ConversationKind::Rfq => None,
        };
        let mut rfq_sub: Option<Subscription<Vec<Row>>> = None;
        self.refresh_rfq_watch(&mut rfq_sub).await;

        let mut identity_open = true;
        while !self.release.is_released() {
            tokio::select! {
                biased;
                _ = self.release.notify.notified() => break,
                Some(command) = self.commands.recv() => self.handle_command(command),
                open = self.identity.changed(), if identity_open => {
                    if open {
                        let actor = self.identity.mark_seen();
                        debug!(conversation = %self.id, ?actor, "actor changed");
                        self.commit(|_| {});
                    } else {
                        identity_open = false;
                    }
                }
                event = next_event(&mut conversation_sub) => match event {
                    Some(event) => {
                        debug!(conversation = %self.id, "conversation notification");
                        self.on_conversation(into_result(event));
                        self.refresh_rfq_watch(&mut rfq_sub).await;
                    }
                    None => conversation_sub = None,
                },
                event = next_event(&mut snapshot_sub) => match event {
                    Some(event) => {
                        debug!(conversation = %self.id, "snapshot notification");
                        self.on_snapshot(into_result(event));
                    }
                    None => snapshot_sub = None,
                },
                event = next_event(&mut rfq_sub) => match event {
                    Some(event) => {
                        debug!(conversation = %self.id, "rfq notification");
                        self.on_rfqs(into_result(event));
                    }
                    None => rfq_sub = None,
                },
            }
        }
        debug!(conversation = %self.id, "conversation task stopped");
    }

    /// Point reads of the conversation and its snapshot, issued together.
    async fn load_initial(&mut self) {
        let settings = Arc::clone(&self.settings);
        let store = Arc::clone(&self.store);
        let id = self.id.0.clone();
        let kind = self.kind;
        let conversation = store.get(&settings.conversations, &id);
        let snapshot = async {
            match kind {
                ConversationKind::Product { .. } => {
                    Some(store.get(&settings.snapshots, &id).await)
                }
                ConversationKind::Rfq => None,
            }
        };
        let (conversation, snapshot) = futures::join!(conversation, snapshot);

        self.on_conversation(conversation);
        if let Some(snapshot) = snapshot {
            self.on_snapshot(snapshot);
        }
    }

    async fn watch_document(
        &mut self,
        collection: &str,
        pane: Pane,
    ) -> Option<Subscription<Option<Document>>> {
        if self.release.is_released() {
            return None;
        }
        match self.store.subscribe(collection, &self.id.0).await {
            Ok(sub) => Some(sub),
            Err(err) => {
                warn!(conversation = %self.id, collection, "watch failed: {err}");
                self.commit(|view| view.set_notice(pane, Some(notice_for(&err, pane))));
                None
            }
        }
    }

    /// (Re)opens the RFQ query watch whenever the participant pair changes.
    async fn refresh_rfq_watch(&mut self, sub: &mut Option<Subscription<Vec<Row>>>) {
        if self.kind != ConversationKind::Rfq || self.release.is_released() {
            return;
        }
        let Some(pair) = self.view.participants.clone() else {
            return;
        };
        if self.rfq_pair.as_ref() == Some(&pair) {
            return;
        }
        if let Some(mut old) = sub.take() {
            old.unsubscribe();
        }
        self.rfq_pair = Some(pair.clone());

        let settings = Arc::clone(&self.settings);
        let predicates = [
            Predicate::eq("buyerId", pair.buyer.0.clone()),
            Predicate::eq("supplierId", pair.supplier.0.clone()),
        ];
        let initial = self.store.query(&settings.rfqs, &predicates).await;
        self.on_rfqs(initial);
        if self.release.is_released() {
            return;
        }
        match self.store.subscribe_query(&settings.rfqs, &predicates).await {
            Ok(query) => *sub = Some(query),
            Err(err) => {
                warn!(conversation = %self.id, "rfq watch failed: {err}");
                self.on_rfqs(Err(err));
            }
        }
    }

    fn on_conversation(&mut self, result: Result<Option<Document>, StoreError>) {
        match result {
            Ok(Some(doc)) => match decode::conversation(
                &self.id,
                &doc,
                &self.settings.transcript_field,
            ) {
                Ok((conversation, skipped)) => {
                    for err in &skipped {
                        warn!(conversation = %self.id, "skipped message: {err}");
                    }
                    self.commit(|view| {
                        view.replace_conversation(conversation);
                        view.transcript_notice = (!skipped.is_empty()).then(|| {
                            Notice::malformed(format!("{} message(s) skipped", skipped.len()))
                        });
                    });
                }
                Err(err) => {
                    warn!(conversation = %self.id, "rejected conversation document: {err}");
                    self.commit(|view| view.transcript_notice = Some(Notice::malformed(err.to_string())));
                }
            },
            Ok(None) => self.commit(|view| {
                view.participants = None;
                view.transcript.clear();
                view.transcript_notice = Some(Notice::not_found(Pane::Transcript));
            }),
            Err(err) => {
                warn!(conversation = %self.id, "conversation read failed: {err}");
                self.commit(|view| {
                    view.transcript_notice = Some(notice_for(&err, Pane::Transcript));
                });
            }
        }
    }

    fn on_snapshot(&mut self, result: Result<Option<Document>, StoreError>) {
        let ConversationKind::Product { missing_snapshot } = self.kind else {
            return;
        };
        match result {
            Ok(Some(doc)) => match decode::product_snapshot(&doc) {
                Ok(snapshot) => self.commit(|view| {
                    view.attachment = Attachment::Product(Some(snapshot));
                    view.attachment_notice = None;
                }),
                Err(err) => {
                    warn!(conversation = %self.id, "rejected snapshot document: {err}");
                    self.commit(|view| view.attachment_notice = Some(Notice::malformed(err.to_string())));
                }
            },
            Ok(None) => self.commit(|view| {
                view.attachment = Attachment::Product(None);
                view.attachment_notice = match missing_snapshot {
                    MissingSnapshot::Report => Some(Notice::not_found(Pane::Attachment)),
                    MissingSnapshot::Ignore => None,
                };
            }),
            Err(err) => {
                warn!(conversation = %self.id, "snapshot read failed: {err}");
                self.commit(|view| {
                    view.attachment_notice = Some(notice_for(&err, Pane::Attachment));
                });
            }
        }
    }

    fn on_rfqs(&mut self, result: Result<Vec<Row>, StoreError>) {
        match result {
            Ok(rows) => {
                let (records, rejected) = decode::rfq_records(&rows);
                for (id, err) in &rejected {
                    warn!(conversation = %self.id, rfq = %id, "rejected rfq document: {err}");
                }
                self.commit(|view| {
                    view.attachment = Attachment::Rfq(records);
                    view.attachment_notice = (!rejected.is_empty()).then(|| {
                        Notice::malformed(format!("{} rfq record(s) skipped", rejected.len()))
                    });
                });
            }
            Err(err) => {
                warn!(conversation = %self.id, "rfq query failed: {err}");
                self.commit(|view| {
                    view.attachment_notice = Some(notice_for(&err, Pane::Attachment));
                });
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => {
                let item = decode::encode_message(&message);
                self.commit(|view| view.transcript.push(message));

                let store = Arc::clone(&self.store);
                let settings = Arc::clone(&self.settings);
                let id = self.id.clone();
                let failures = self.commands_tx.clone();
                tokio::spawn(async move {
                    let result = store
                        .append(&settings.conversations, &id.0, &settings.transcript_field, item)
                        .await;
                    if let Err(err) = result {
                        let _ = failures.send(Command::AppendFailed(err));
                    }
                });
            }
            Command::AppendFailed(err) => {
                warn!(conversation = %self.id, "message append failed: {err}");
                self.commit(|view| {
                    view.transcript_notice = Some(notice_for(&err, Pane::Transcript));
                });
            }
        }
    }

    /// Applies one mutation, re-evaluates authorization and publishes.
    /// A no-op once the view is released.
    fn commit(&mut self, mutate: impl FnOnce(&mut ConversationView)) {
        let release = Arc::clone(&self.release);
        let redirect = {
            let Some(_held) = release.hold() else {
                return;
            };
            mutate(&mut self.view);
            let redirect = self.authorize();

            let visible = self.view.visible();
            self.view_tx.send_if_modified(|current| {
                if *current == visible {
                    return false;
                }
                *current = visible;
                true
            });
            redirect
        };

        // The navigator may close this view, so it runs outside the lock.
        if redirect && !release.is_released() {
            warn!(conversation = %self.id, "actor is not a participant, redirecting");
            self.navigator.redirect(&self.settings.unauthorized_redirect);
        }
    }

    /// Sets `is_authorized`; returns whether a redirect is due.
    fn authorize(&mut self) -> bool {
        let actor = self.identity.current();
        let decision = match (&actor, &self.view.participants) {
            (ActorState::Pending, _) | (_, None) => None,
            (ActorState::SignedOut, Some(_)) => Some(false),
            (ActorState::Resolved(id), Some(participants)) => Some(participants.includes(id)),
        };
        self.view.is_authorized = decision;

        match decision {
            Some(false) => {
                let context = actor.actor_id().cloned();
                if self.redirected_for.as_ref() == Some(&context) {
                    return false;
                }
                self.redirected_for = Some(context);
                true
            }
            Some(true) => {
                self.redirected_for = None;
                false
            }
            None => false,
        }
    }
}
