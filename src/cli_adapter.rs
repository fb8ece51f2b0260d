use crate::identity::{ActorState, IdentityProvider};
use crate::memory_store::MemoryStore;
use crate::store::Document;
use crate::sync::ConversationHandle;
use crate::types::{ActorId, MessageBody};
use crate::view::ConversationView;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// One line of a replay script (JSON lines, `#` comments allowed).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    Put {
        collection: String,
        id: String,
        doc: Value,
    },
    Remove {
        collection: String,
        id: String,
    },
    /// Without `id` the failure goes to query watches on the collection.
    Fail {
        collection: String,
        #[serde(default)]
        id: Option<String>,
        reason: String,
    },
    Offline {
        offline: bool,
    },
    Sleep {
        ms: u64,
    },
    Identity {
        #[serde(default)]
        actor: Option<String>,
        #[serde(default)]
        pending: bool,
    },
    Send {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        file_url: Option<String>,
    },
}

pub fn parse_script_line(line: &str) -> Result<Option<ScriptStep>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let step = serde_json::from_str(trimmed)
        .with_context(|| format!("invalid script line: {trimmed}"))?;
    Ok(Some(step))
}

pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let step = parse_script_line(line).with_context(|| format!("script line {}", idx + 1))?;
        steps.extend(step);
    }
    Ok(steps)
}

pub fn read_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read script: {}", path.display()))?;
    parse_script(&content)
}

/// `-` means signed out, `?` means still resolving.
pub fn parse_actor(arg: &str) -> Result<ActorState> {
    let trimmed = arg.trim();
    match trimmed {
        "" => bail!("actor must not be empty"),
        "-" => Ok(ActorState::SignedOut),
        "?" => Ok(ActorState::Pending),
        id => Ok(ActorState::Resolved(ActorId(id.to_string()))),
    }
}

fn into_document(collection: &str, id: &str, value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("script document {collection}/{id} is not an object"),
    }
}

/// Applies script steps in order against the store, the identity provider and
/// the open view.
pub async fn play(
    store: &MemoryStore,
    identity: &IdentityProvider,
    handle: &ConversationHandle,
    steps: Vec<ScriptStep>,
) -> Result<()> {
    for step in steps {
        info!(?step, "script step");
        match step {
            ScriptStep::Put {
                collection,
                id,
                doc,
            } => {
                let doc = into_document(&collection, &id, doc)?;
                store.put(&collection, &id, doc);
            }
            ScriptStep::Remove { collection, id } => store.remove(&collection, &id),
            ScriptStep::Fail {
                collection,
                id: Some(id),
                reason,
            } => store.fail_document(&collection, &id, &reason),
            ScriptStep::Fail {
                collection,
                id: None,
                reason,
            } => store.fail_queries(&collection, &reason),
            ScriptStep::Offline { offline } => store.set_offline(offline),
            ScriptStep::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            ScriptStep::Identity { actor, pending } => identity.set(match (pending, actor) {
                (true, _) => ActorState::Pending,
                (false, Some(id)) => ActorState::Resolved(ActorId(id)),
                (false, None) => ActorState::SignedOut,
            }),
            ScriptStep::Send { text, file_url } => {
                let body = MessageBody {
                    text,
                    attachment_url: file_url,
                };
                if let Err(err) = handle.send(body) {
                    warn!("script send rejected: {err}");
                }
            }
        }
    }
    Ok(())
}

pub fn pretty_view(view: &ConversationView) -> Result<String> {
    let json = serde_json::to_string_pretty(view)?;
    Ok(json)
}
