use crate::types::{Conversation, ConversationKind, Message, Participants, ProductSnapshot, RfqRecord};
use serde::Serialize;

pub const TRANSCRIPT_NOT_FOUND: &str = "Conversation not found.";
pub const ATTACHMENT_NOT_FOUND: &str = "Product details not found.";
pub const CONNECTION_ERROR: &str = "Connection error. Showing the last received data.";
pub const MALFORMED: &str = "Received data could not be read.";

/// The two independently failing regions of a conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Transcript,
    Attachment,
}

/// Inline notice shown in one pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NotFound { text: String },
    ConnectionError { text: String, detail: String },
    Malformed { text: String, detail: String },
}

impl Notice {
    pub fn not_found(pane: Pane) -> Self {
        let text = match pane {
            Pane::Transcript => TRANSCRIPT_NOT_FOUND,
            Pane::Attachment => ATTACHMENT_NOT_FOUND,
        };
        Notice::NotFound {
            text: text.to_string(),
        }
    }

    pub fn connection_error(detail: impl Into<String>) -> Self {
        Notice::ConnectionError {
            text: CONNECTION_ERROR.to_string(),
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Notice::Malformed {
            text: MALFORMED.to_string(),
            detail: detail.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Notice::NotFound { text }
            | Notice::ConnectionError { text, .. }
            | Notice::Malformed { text, .. } => text,
        }
    }
}

/// Data shown next to the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Attachment {
    Product(Option<ProductSnapshot>),
    Rfq(Vec<RfqRecord>),
}

/// Everything the rendering layer needs for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationView {
    pub participants: Option<Participants>,
    pub transcript: Vec<Message>,
    pub attachment: Attachment,
    pub transcript_notice: Option<Notice>,
    pub attachment_notice: Option<Notice>,
    /// `None` until both the actor and the metadata are known.
    pub is_authorized: Option<bool>,
}

impl ConversationView {
    pub fn new(kind: ConversationKind) -> Self {
        let attachment = match kind {
            ConversationKind::Product { .. } => Attachment::Product(None),
            ConversationKind::Rfq => Attachment::Rfq(Vec::new()),
        };
        Self {
            participants: None,
            transcript: Vec::new(),
            attachment,
            transcript_notice: None,
            attachment_notice: None,
            is_authorized: None,
        }
    }

    pub fn notice(&self, pane: Pane) -> Option<&Notice> {
        match pane {
            Pane::Transcript => self.transcript_notice.as_ref(),
            Pane::Attachment => self.attachment_notice.as_ref(),
        }
    }

    pub(crate) fn set_notice(&mut self, pane: Pane, notice: Option<Notice>) {
        match pane {
            Pane::Transcript => self.transcript_notice = notice,
            Pane::Attachment => self.attachment_notice = notice,
        }
    }

    pub(crate) fn replace_conversation(&mut self, conversation: Conversation) {
        self.participants = Some(conversation.participants);
        self.transcript = conversation.transcript;
    }

    /// The view with conversation data stripped. Used until the actor is
    /// known to be a participant; notices survive only while undecided.
    pub fn redacted(&self) -> Self {
        let attachment = match &self.attachment {
            Attachment::Product(_) => Attachment::Product(None),
            Attachment::Rfq(_) => Attachment::Rfq(Vec::new()),
        };
        let keep_notices = self.is_authorized.is_none();
        Self {
            participants: None,
            transcript: Vec::new(),
            attachment,
            transcript_notice: self.transcript_notice.clone().filter(|_| keep_notices),
            attachment_notice: self.attachment_notice.clone().filter(|_| keep_notices),
            is_authorized: self.is_authorized,
        }
    }

    /// What the rendering layer is allowed to see.
    pub fn visible(&self) -> Self {
        match self.is_authorized {
            Some(true) => self.clone(),
            _ => self.redacted(),
        }
    }
}
