//! Shutdown signalling between the driver and its worker tasks.

use tokio::sync::watch;

/// Broadcast side of a one-shot shutdown signal.
///
/// The driver owns the [Notifier]; every task it spawns holds a [Noticer].
/// Triggering is idempotent and never blocks.
#[derive(Debug)]
pub struct Notifier {
    tx: watch::Sender<bool>,
}

impl Notifier {
    /// A fresh, untriggered notifier.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Signal shutdown to every subscribed [Noticer].
    pub fn notify(&self) {
        // send_replace never fails even with no live receivers
        self.tx.send_replace(true);
    }

    /// A new subscription; sees the signal even if already triggered.
    pub fn subscribe(&self) -> Noticer {
        Noticer { rx: self.tx.subscribe() }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive side of the shutdown signal.
#[derive(Clone, Debug)]
pub struct Noticer {
    rx: watch::Receiver<bool>,
}

impl Noticer {
    /// Resolves once the paired [Notifier] has fired.
    ///
    /// Usable from `&self` so it composes inside `select!` loops without
    /// threading mutable receivers around.
    pub async fn notified(&self) {
        let mut rx = self.rx.clone();
        // wait_for also resolves immediately when the value is already true
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// True once the paired [Notifier] has fired.
    pub fn is_notified(&self) -> bool {
        *self.rx.borrow()
    }
}
