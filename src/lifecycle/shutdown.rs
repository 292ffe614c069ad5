use std::sync::Arc;

use tokio::sync::watch;

/// Shared, cloneable cancellation signal.
///
/// Every clone observes the same flag. A [`child`](Shutdown::child) has a
/// flag of its own and also observes its parent's, so one partition claim can
/// be stopped on revocation without touching the rest of the process.
#[derive(Clone, Debug)]
pub struct Shutdown {
    own: Arc<watch::Sender<bool>>,
    parent: Option<Arc<watch::Sender<bool>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            parent: None,
        }
    }

    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            parent: Some(self.own.clone()),
        }
    }

    /// Idempotent. Wakes every task waiting in [`cancelled`](Shutdown::cancelled).
    pub fn trigger(&self) {
        self.own.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.own.borrow() || self.parent.as_ref().is_some_and(|p| *p.borrow())
    }

    /// Resolves once this signal or its parent has been triggered.
    pub async fn cancelled(&self) {
        let mut own = self.own.subscribe();
        match &self.parent {
            None => wait_for_trigger(&mut own).await,
            Some(parent) => {
                let mut parent = parent.subscribe();
                tokio::select! {
                    _ = wait_for_trigger(&mut own) => {}
                    _ = wait_for_trigger(&mut parent) => {}
                }
            }
        }
    }
}

async fn wait_for_trigger(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the `Shutdown` holding it, so an error here
    // only happens while that owner is being torn down.
    let _ = rx.wait_for(|triggered| *triggered).await;
}
