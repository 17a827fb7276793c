use std::sync::Arc;
use tokio::sync::watch;

/// What the external control surface can change. The loop reads it through
/// a watch channel and is the only party that acts on it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub running: bool,
    pub credential: Option<String>,
    pub profile: String,
    /// Bumped on every STOPPED→RUNNING flip, so a stop+start pair that the
    /// watch channel coalesces still reads as a restart.
    pub epoch: u64,
}

impl SessionSettings {
    pub fn credential(&self) -> Option<&str> {
        self.credential
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }
}

/// Cloneable handle for start/stop/credential/profile commands.
/// Every command is idempotent: repeating it does not wake the loop.
#[derive(Clone)]
pub struct SessionControl {
    tx: Arc<watch::Sender<SessionSettings>>,
}

impl SessionControl {
    pub fn new(initial: SessionSettings) -> (Self, watch::Receiver<SessionSettings>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn start(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.running {
                return false;
            }
            s.running = true;
            s.epoch += 1;
            true
        })
    }

    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|s| std::mem::replace(&mut s.running, false))
    }

    pub fn set_credential(&self, value: &str) -> bool {
        let value = value.trim();
        let next = (!value.is_empty()).then(|| value.to_string());
        self.tx.send_if_modified(|s| {
            if s.credential == next {
                false
            } else {
                s.credential = next.clone();
                true
            }
        })
    }

    pub fn set_profile(&self, id: &str) -> bool {
        self.tx.send_if_modified(|s| {
            if s.profile == id {
                false
            } else {
                s.profile = id.to_string();
                true
            }
        })
    }

    pub fn settings(&self) -> SessionSettings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSettings> {
        self.tx.subscribe()
    }
}
