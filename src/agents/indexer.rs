//! Document upload, indexing and agent binding

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::domain::{DocumentHandle, FileId, IndexId, Passage};
use super::error::{AgentError, AgentResult, RemoteResult};
use super::hosting::{with_retry, RetryPolicy};
use super::registry::AgentRegistry;

/// File extensions accepted for upload
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "docx"];

/// Storage and retrieval capability behind document indexes
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn upload_file(&self, bytes: Vec<u8>, file_name: &str) -> RemoteResult<FileId>;

    /// Build a searchable index over uploaded files
    async fn create_index(&self, name: &str, files: &[FileId]) -> RemoteResult<IndexId>;

    async fn search(&self, index: &IndexId, query: &str, top_k: usize) -> RemoteResult<Vec<Passage>>;

    async fn delete_index(&self, index: &IndexId) -> RemoteResult<()>;
}

/// Reject file names whose extension is not supported, before any remote call
pub fn check_format(file_name: &str) -> AgentResult<()> {
    let supported = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false);

    if supported {
        Ok(())
    } else {
        Err(AgentError::UnsupportedFormat(file_name.to_string()))
    }
}

/// Uploads documents and binds the resulting index to one agent
pub struct DocumentIndexer {
    backend: Arc<dyn IndexBackend>,
    agents: Arc<AgentRegistry>,
    /// Index -> agent it is bound to
    bindings: Mutex<HashMap<IndexId, String>>,
    top_k: usize,
    retry: RetryPolicy,
}

impl DocumentIndexer {
    pub fn new(backend: Arc<dyn IndexBackend>, agents: Arc<AgentRegistry>, top_k: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            agents,
            bindings: Mutex::new(HashMap::new()),
            top_k,
            retry,
        }
    }

    /// Upload a file and build a fresh index over it
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> AgentResult<DocumentHandle> {
        check_format(file_name)?;

        let size = bytes.len();
        let file_id = self.backend.upload_file(bytes, file_name).await?;
        let index_id = self.backend.create_index(file_name, std::slice::from_ref(&file_id)).await?;

        info!(file = %file_name, file_id = %file_id, index = %index_id, size, "Indexed document");

        Ok(DocumentHandle {
            file_id,
            file_name: file_name.to_string(),
            index_id,
        })
    }

    /// Upload several files into one fresh index. Every format is checked
    /// before the first upload.
    pub async fn upload_batch(&self, files: Vec<(Vec<u8>, String)>) -> AgentResult<Vec<DocumentHandle>> {
        if files.is_empty() {
            return Err(AgentError::Validation("no files to upload".to_string()));
        }
        for (_, name) in &files {
            check_format(name)?;
        }

        let mut uploaded = Vec::with_capacity(files.len());
        for (bytes, name) in files {
            let file_id = self.backend.upload_file(bytes, &name).await?;
            uploaded.push((file_id, name));
        }

        let ids: Vec<FileId> = uploaded.iter().map(|(id, _)| id.clone()).collect();
        let index_name = match uploaded.len() {
            1 => uploaded[0].1.clone(),
            n => format!("{} (+{} more)", uploaded[0].1, n - 1),
        };
        let index_id = self.backend.create_index(&index_name, &ids).await?;
        info!(files = uploaded.len(), index = %index_id, "Indexed documents");

        Ok(uploaded
            .into_iter()
            .map(|(file_id, file_name)| DocumentHandle {
                file_id,
                file_name,
                index_id: index_id.clone(),
            })
            .collect())
    }

    /// Bind the handle's index to an agent.
    ///
    /// Each index binds once, and each agent holds at most one index.
    pub async fn attach_to_agent(&self, handle: &DocumentHandle, agent_name: &str) -> AgentResult<()> {
        let mut bindings = self.bindings.lock().await;

        if let Some(bound_to) = bindings.get(&handle.index_id) {
            return Err(AgentError::IndexAlreadyBound {
                agent: bound_to.clone(),
                index: handle.index_id.to_string(),
            });
        }

        let agent = self.agents.get_agent(agent_name).await?;
        if agent.attached_index.is_some() {
            return Err(AgentError::IndexAlreadyBound {
                agent: agent.name,
                index: handle.index_id.to_string(),
            });
        }

        self.agents.set_index(agent_name, Some(handle.index_id.clone())).await?;
        bindings.insert(handle.index_id.clone(), agent_name.to_string());

        info!(agent = %agent_name, index = %handle.index_id, "Bound index to agent");
        Ok(())
    }

    /// Fail with `IndexAlreadyBound` when the agent already holds an index
    pub async fn ensure_unbound(&self, agent_name: &str, file_name: &str) -> AgentResult<()> {
        let agent = self.agents.get_agent(agent_name).await?;
        match agent.attached_index {
            Some(bound) => {
                debug!(agent = %agent_name, index = %bound, file = %file_name, "Agent already holds an index");
                Err(AgentError::IndexAlreadyBound {
                    agent: agent.name,
                    index: file_name.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Delete an index that never got bound. Failures are logged only.
    pub async fn discard(&self, index: &IndexId) {
        match self.backend.delete_index(index).await {
            Ok(()) => info!(index = %index, "Discarded unbound index"),
            Err(e) => warn!(index = %index, error = %e, "Could not discard unbound index"),
        }
    }

    /// Unbind and delete the agent's index, returning it if there was one
    pub async fn release(&self, agent_name: &str) -> AgentResult<Option<IndexId>> {
        let mut bindings = self.bindings.lock().await;

        let agent = self.agents.get_agent(agent_name).await?;
        let Some(index) = agent.attached_index else {
            return Ok(None);
        };

        self.agents.set_index(agent_name, None).await?;
        self.backend.delete_index(&index).await?;
        bindings.remove(&index);

        info!(agent = %agent_name, index = %index, "Released index");
        Ok(Some(index))
    }

    /// Search an index; reads are retried on transient failures
    pub async fn search(&self, index: &IndexId, query: &str) -> AgentResult<Vec<Passage>> {
        let passages = with_retry(&self.retry, "search_index", || {
            self.backend.search(index, query, self.top_k)
        })
        .await?;
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_format() {
        assert!(check_format("report.pdf").is_ok());
        assert!(check_format("Notes.TXT").is_ok());
        assert!(check_format("lease.docx").is_ok());
        assert!(matches!(check_format("report.exe"), Err(AgentError::UnsupportedFormat(_))));
        assert!(check_format("README").is_err());
        assert!(check_format("archive.pdf.zip").is_err());
    }

    fn indexer() -> (Arc<crate::agents::hosting::InMemoryHost>, Arc<AgentRegistry>, DocumentIndexer) {
        let host = Arc::new(crate::agents::hosting::InMemoryHost::new());
        let agents = Arc::new(AgentRegistry::new(host.clone(), RetryPolicy::none()));
        let indexer = DocumentIndexer::new(host.clone(), agents.clone(), 3, RetryPolicy::none());
        (host, agents, indexer)
    }

    #[tokio::test]
    async fn test_batch_shares_one_index() {
        let (host, _, indexer) = indexer();
        let handles = indexer
            .upload_batch(vec![
                (b"zoning map".to_vec(), "map.pdf".to_string()),
                (b"lease terms".to_vec(), "lease.docx".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].index_id, handles[1].index_id);
        assert!(host.index_exists(&handles[0].index_id).await);
    }

    #[tokio::test]
    async fn test_batch_checks_every_format_first() {
        let (_, _, indexer) = indexer();
        let err = indexer
            .upload_batch(vec![
                (b"ok".to_vec(), "a.txt".to_string()),
                (b"nope".to_vec(), "b.exe".to_string()),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_attach_release_cycle() {
        use crate::agents::domain::{AgentDefinition, AgentRole};

        let (host, agents, indexer) = indexer();
        agents
            .ensure_agent(AgentDefinition::new("ZoningAdvisorAgent", AgentRole::Sub, "zoning"))
            .await
            .unwrap();

        let first = indexer.upload(b"R-2 rules".to_vec(), "rules.txt").await.unwrap();
        indexer.attach_to_agent(&first, "ZoningAdvisorAgent").await.unwrap();

        let second = indexer.upload(b"more".to_vec(), "more.txt").await.unwrap();
        assert!(matches!(
            indexer.attach_to_agent(&second, "ZoningAdvisorAgent").await,
            Err(AgentError::IndexAlreadyBound { .. })
        ));

        assert_eq!(indexer.release("ZoningAdvisorAgent").await.unwrap(), Some(first.index_id.clone()));
        assert!(!host.index_exists(&first.index_id).await);
        indexer.attach_to_agent(&second, "ZoningAdvisorAgent").await.unwrap();
        assert_eq!(
            agents.get_agent("ZoningAdvisorAgent").await.unwrap().attached_index,
            Some(second.index_id)
        );
    }
}
