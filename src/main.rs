use anyhow::{Context, Result};
use marsos_sync::cli_adapter;
use marsos_sync::config::Config;
use marsos_sync::fixture;
use marsos_sync::logging;
use marsos_sync::{
    ChannelNavigator, ConversationId, ConversationKind, ConversationSync, IdentityProvider,
    MemoryStore, MissingSnapshot, SyncSettings,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::info;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let _bin = args.remove(0);
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    match args[0].as_str() {
        "watch" => run_watch(&args[1..]).await,
        "check-config" => run_check_config(&args[1..]),
        "help" | "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            Err(anyhow::anyhow!("unknown command: {other}"))
        }
    }
}

fn run_check_config(args: &[String]) -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let value = args.get(i + 1).context("--config requires a value")?;
                config_path = Some(PathBuf::from(value));
                i += 2;
            }
            other => {
                return Err(anyhow::anyhow!("unknown check-config argument: {other}"));
            }
        }
    }

    let config_path = config_path.context("--config is required")?;
    let config = Config::load(&config_path)?;
    println!(
        "ok: conversations={} snapshots={} rfqs={} redirect={}",
        config.collections.conversations,
        config.collections.snapshots,
        config.collections.rfqs,
        config.navigation.unauthorized_redirect
    );
    Ok(())
}

async fn run_watch(args: &[String]) -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut fixture_path: Option<PathBuf> = None;
    let mut script_path: Option<PathBuf> = None;
    let mut conversation: Option<String> = None;
    let mut actor: Option<String> = None;
    let mut kind = ConversationKind::Product {
        missing_snapshot: MissingSnapshot::Report,
    };
    let mut timeout_secs = DEFAULT_TIMEOUT_SECS;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let value = args.get(i + 1).context("--config requires a value")?;
                config_path = Some(PathBuf::from(value));
                i += 2;
            }
            "--fixture" => {
                let value = args.get(i + 1).context("--fixture requires a value")?;
                fixture_path = Some(PathBuf::from(value));
                i += 2;
            }
            "--script" => {
                let value = args.get(i + 1).context("--script requires a value")?;
                script_path = Some(PathBuf::from(value));
                i += 2;
            }
            "--conversation" => {
                let value = args.get(i + 1).context("--conversation requires a value")?;
                conversation = Some(value.to_string());
                i += 2;
            }
            "--actor" => {
                let value = args.get(i + 1).context("--actor requires a value")?;
                actor = Some(value.to_string());
                i += 2;
            }
            "--rfq" => {
                kind = ConversationKind::Rfq;
                i += 1;
            }
            "--quiet-snapshot" => {
                kind = ConversationKind::Product {
                    missing_snapshot: MissingSnapshot::Ignore,
                };
                i += 1;
            }
            "--timeout" => {
                let value = args.get(i + 1).context("--timeout requires a value")?;
                timeout_secs = value.parse().context("invalid --timeout")?;
                i += 2;
            }
            "--help" | "-h" => {
                print_watch_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown watch argument: {other}"));
            }
        }
    }

    let conversation = conversation.context("--conversation is required")?;
    let actor = cli_adapter::parse_actor(&actor.context("--actor is required")?)?;
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    logging::init(&config.logging)?;

    let store = MemoryStore::new();
    if let Some(path) = fixture_path.or_else(|| config.store.fixture.clone()) {
        fixture::load(&store, &path)?;
    }
    let steps = match &script_path {
        Some(path) => cli_adapter::read_script(path)?,
        None => Vec::new(),
    };

    let (navigator, mut redirects) = ChannelNavigator::new();
    let sync = ConversationSync::new(
        Arc::new(store.clone()),
        Arc::new(navigator),
        SyncSettings::from(&config),
    );
    let identity = IdentityProvider::new(actor);
    let handle = sync.open(ConversationId(conversation), kind, identity.watch());
    info!(conversation = %handle.id(), timeout_secs, "watching conversation");

    {
        let mut views = WatchStream::new(handle.view());
        let script = cli_adapter::play(&store, &identity, &handle, steps);
        tokio::pin!(script);
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);
        let mut script_done = false;

        loop {
            tokio::select! {
                maybe_view = views.next() => match maybe_view {
                    Some(view) => println!("{}", cli_adapter::pretty_view(&view)?),
                    None => break,
                },
                Some(path) = redirects.recv() => {
                    println!("redirect: {path}");
                    break;
                }
                result = &mut script, if !script_done => {
                    script_done = true;
                    result?;
                }
                _ = &mut deadline => {
                    info!("watch timeout reached");
                    break;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    handle.closed().await;
    Ok(())
}

fn print_usage() {
    eprintln!(
        "marsos-sync usage:\n  marsos-sync watch --conversation <id> --actor <id|-|?> [options]\n  marsos-sync check-config --config <path>"
    );
}

fn print_watch_usage() {
    eprintln!(
        "marsos-sync watch options:\n  --conversation <id>\n  --actor <id|-|?>\n  --config <path>\n  --fixture <path>\n  --script <path>\n  --rfq\n  --quiet-snapshot\n  --timeout <secs>"
    );
}
