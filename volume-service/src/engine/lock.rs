// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Process-wide exclusion for commands that change volume group or mount
/// state. Clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct SerializationLock {
    inner: Arc<Mutex<()>>,
}

/// Held while a mutating step runs; released on drop.
#[must_use = "the lock is released as soon as the token is dropped"]
#[derive(Debug)]
pub struct LockToken {
    _guard: OwnedMutexGuard<()>,
    purpose: &'static str,
}

impl SerializationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, purpose: &'static str) -> LockToken {
        debug!("Waiting for lock ({purpose})");
        let guard = self.inner.clone().lock_owned().await;
        debug!("Lock acquired ({purpose})");
        LockToken {
            _guard: guard,
            purpose,
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        debug!("Lock released ({})", self.purpose);
    }
}
