//! Shared application-level state: lifecycle flags and the cooperative
//! shutdown signal, layered above [`crate::core::engine::Engine`].

use tokio::sync::watch;

/// Cooperative shutdown signal shared between the tick loop and the CLI's
/// Ctrl-C handler (`spec.md` §4.9 shutdown sequence).
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal shutdown to every clone of this handle.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once [`Self::trigger`] has been called on any clone.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}
