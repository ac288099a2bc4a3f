//! In-flight task table
//!
//! Maps task ids to cancellation tokens so a caller can cancel a running
//! task by id. Entries live exactly as long as their [`TaskGuard`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct TaskTable {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task; dropping the guard removes it
    pub fn register(&self) -> TaskGuard {
        let id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        self.lock().insert(id.clone(), token.clone());
        TaskGuard {
            table: self.clone(),
            id,
            token,
        }
    }

    /// Cancel one task; false if it is unknown or already finished
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything, e.g. on shutdown
    pub fn cancel_all(&self) {
        for token in self.lock().values() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one running task
pub struct TaskGuard {
    table: TaskTable,
    id: String,
    token: CancellationToken,
}

impl TaskGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.id);
    }
}
