use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation shared between a caller and a running job
///
/// Clones observe the same flag. Jobs check it at their suspension points.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        CancelHandle {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Every handle holds the sender, so this is unreachable in practice
                std::future::pending::<()>().await;
            }
        }
    }
}
