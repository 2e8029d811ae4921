//! Thread store
//!
//! Named, append-only conversation logs. Each thread is backed by one remote
//! conversation context and guarded by its own async mutex so that turns on
//! the same thread run one at a time.
//!
//! Delegated turns run on child threads named `<parent>/<agent>`. Children
//! are hidden from listings and deleted together with their parent.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use super::domain::{Message, Thread, ThreadId, ThreadRef, ThreadSummary};
use super::error::{AgentError, AgentResult};
use super::hosting::AgentHost;

/// Separator between a parent thread name and a delegate agent name
pub const CHILD_SEPARATOR: char = '/';

struct Entry {
    thread: Thread,
    turn_lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Entry>,
    names: HashMap<ThreadId, String>,
}

pub struct ThreadStore {
    host: Arc<dyn AgentHost>,
    inner: RwLock<Inner>,
}

impl ThreadStore {
    pub fn new(host: Arc<dyn AgentHost>) -> Self {
        Self {
            host,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Create a thread under a caller-chosen name
    pub async fn create(&self, name: &str) -> AgentResult<Thread> {
        if name.is_empty() || name.trim() != name || name.contains(CHILD_SEPARATOR) {
            return Err(AgentError::Validation(format!(
                "thread name '{}' must be non-empty, without surrounding spaces or '{}'",
                name, CHILD_SEPARATOR
            )));
        }
        self.insert(name, None).await
    }

    /// Child thread for delegating to `agent`, created on first use
    pub async fn child(&self, parent: &str, agent: &str) -> AgentResult<Thread> {
        let name = format!("{}{}{}", parent, CHILD_SEPARATOR, agent);
        if let Some(entry) = self.inner.read().await.by_name.get(&name) {
            return Ok(entry.thread.clone());
        }

        let parent_id = self.get(parent).await?.id;
        match self.insert(&name, Some(parent_id)).await {
            // lost a race with another creator
            Err(AgentError::DuplicateName(_)) => self.get(&name).await,
            other => other,
        }
    }

    async fn insert(&self, name: &str, parent: Option<ThreadId>) -> AgentResult<Thread> {
        if self.inner.read().await.by_name.contains_key(name) {
            return Err(AgentError::DuplicateName(format!("thread '{}'", name)));
        }

        let remote = self.host.create_thread().await?;

        let mut inner = self.inner.write().await;
        if inner.by_name.contains_key(name) {
            drop(inner);
            self.discard_remote(&remote).await;
            return Err(AgentError::DuplicateName(format!("thread '{}'", name)));
        }

        let mut thread = Thread::new(name, remote);
        if let Some(parent) = &parent {
            thread = thread.child_of(parent);
        }

        inner.names.insert(thread.id.clone(), name.to_string());
        inner.by_name.insert(
            name.to_string(),
            Entry {
                thread: thread.clone(),
                turn_lock: Arc::new(Mutex::new(())),
            },
        );

        info!(thread = %name, id = %thread.id, remote = %thread.remote, "Created thread");
        Ok(thread)
    }

    async fn discard_remote(&self, remote: &ThreadRef) {
        if let Err(e) = self.host.delete_thread(remote).await {
            debug!(remote = %remote, error = %e, "Could not discard remote thread");
        }
    }

    /// Snapshot of a thread by name
    pub async fn get(&self, name: &str) -> AgentResult<Thread> {
        self.inner
            .read()
            .await
            .by_name
            .get(name)
            .map(|e| e.thread.clone())
            .ok_or_else(|| AgentError::NotFound(format!("thread '{}'", name)))
    }

    /// Snapshot of a thread by id
    pub async fn get_by_id(&self, id: &ThreadId) -> AgentResult<Thread> {
        let inner = self.inner.read().await;
        inner
            .names
            .get(id)
            .and_then(|name| inner.by_name.get(name))
            .map(|e| e.thread.clone())
            .ok_or_else(|| AgentError::NotFound(format!("thread id '{}'", id)))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.by_name.contains_key(name)
    }

    /// Top-level threads, oldest first
    pub async fn list(&self) -> Vec<ThreadSummary> {
        let inner = self.inner.read().await;
        let mut threads: Vec<&Thread> = inner
            .by_name
            .values()
            .map(|e| &e.thread)
            .filter(|t| t.parent.is_none())
            .collect();
        threads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        threads.iter().map(|t| t.to_summary()).collect()
    }

    /// Append one message; returns the new message count
    pub async fn append(&self, id: &ThreadId, message: Message) -> AgentResult<usize> {
        let mut inner = self.inner.write().await;
        let name = inner
            .names
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("thread id '{}'", id)))?;
        let entry = inner
            .by_name
            .get_mut(&name)
            .ok_or_else(|| AgentError::NotFound(format!("thread '{}'", name)))?;

        debug!(thread = %name, role = %message.role, "Appending message");
        entry.thread.messages.push(message);
        Ok(entry.thread.messages.len())
    }

    /// Exclusive turn access to a thread, held until the guard drops
    pub async fn lock(&self, id: &ThreadId) -> AgentResult<OwnedMutexGuard<()>> {
        let turn_lock = {
            let inner = self.inner.read().await;
            inner
                .names
                .get(id)
                .and_then(|name| inner.by_name.get(name))
                .map(|e| e.turn_lock.clone())
                .ok_or_else(|| AgentError::NotFound(format!("thread id '{}'", id)))?
        };
        Ok(turn_lock.lock_owned().await)
    }

    /// Delete a thread and its children, locally and remotely.
    ///
    /// Remote deletion is not retried.
    pub async fn delete(&self, name: &str) -> AgentResult<()> {
        let thread = self.get(name).await?;
        let _turn = self.lock(&thread.id).await?;

        let prefix = format!("{}{}", name, CHILD_SEPARATOR);
        let doomed: Vec<(String, ThreadRef)> = {
            let inner = self.inner.read().await;
            inner
                .by_name
                .iter()
                .filter(|(n, _)| n.as_str() == name || n.starts_with(&prefix))
                .map(|(n, e)| (n.clone(), e.thread.remote.clone()))
                .collect()
        };

        for (_, remote) in &doomed {
            self.host.delete_thread(remote).await?;
        }

        let mut inner = self.inner.write().await;
        for (n, _) in &doomed {
            if let Some(entry) = inner.by_name.remove(n) {
                inner.names.remove(&entry.thread.id);
            }
        }

        info!(thread = %name, children = doomed.len() - 1, "Deleted thread");
        Ok(())
    }

    /// Delete every thread; returns how many top-level threads were removed
    pub async fn delete_all(&self) -> AgentResult<usize> {
        let names: Vec<String> = self.list().await.into_iter().map(|t| t.name).collect();
        for name in &names {
            self.delete(name).await?;
        }
        Ok(names.len())
    }
}
