use tokio::sync::watch;

/// Shared online/offline signal.
///
/// Live tables opened with a receiver from [`Connectivity::subscribe`] hold
/// queued pulls while offline and drain them when the signal flips back to
/// online.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn online(&self) {
        self.set(true);
    }

    pub fn offline(&self) {
        self.set(false);
    }

    /// Update the signal. Receivers are only woken on an actual change.
    pub fn set(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
