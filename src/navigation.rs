use tokio::sync::mpsc;
use tracing::warn;

/// "Redirect to path X", supplied by the hosting application.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Forwards redirects to a channel the host drains.
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn redirect(&self, path: &str) {
        if self.tx.send(path.to_string()).is_err() {
            warn!(path, "redirect dropped: no navigation listener");
        }
    }
}
