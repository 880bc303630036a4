//
// gate.rs
//
// Global operations that suspend dispatch while bulk mutations run
//

use std::sync::Arc;

use tokio::sync::watch;

/// Counts active global operations. Dispatch is suspended while the count is non-zero.
#[derive(Debug, Clone)]
pub struct GlobalOperationGate {
    active: Arc<watch::Sender<usize>>,
}

impl Default for GlobalOperationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalOperationGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Declare a bulk operation. It lasts until the guard is dropped.
    pub fn start(&self, reason: &str) -> GlobalOperationGuard {
        self.active.send_modify(|count| *count += 1);
        log::info!("Global operation started: {} ({} active)", reason, *self.active.borrow());
        GlobalOperationGuard {
            active: self.active.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.active.borrow() > 0
    }

    /// Resolve once no global operation is active
    pub async fn wait_until_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Ends its global operation on drop
#[derive(Debug)]
pub struct GlobalOperationGuard {
    active: Arc<watch::Sender<usize>>,
    reason: String,
}

impl Drop for GlobalOperationGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        log::info!(
            "Global operation finished: {} ({} active)",
            self.reason,
            *self.active.borrow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_nested_operations() {
        let gate = GlobalOperationGate::new();
        assert!(!gate.is_paused());
        let a = gate.start("reload");
        let b = gate.start("build");
        assert!(gate.is_paused());
        drop(a);
        assert!(gate.is_paused());
        drop(b);
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_idle_resolves_on_last_drop() {
        let gate = GlobalOperationGate::new();
        let guard = gate.start("reload");

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }
}
