//! The table of open documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::kernel::{KernelLauncher, ProcessLauncher};
use crate::paths;

/// Shared handle to an open document.
///
/// The mutex serializes every operation on one document; different
/// documents proceed in parallel.
pub type DocumentHandle = Arc<Mutex<Document>>;

/// Open documents keyed by their canonical storage path.
pub struct DocumentRegistry {
    config: EngineConfig,
    launcher: Arc<dyn KernelLauncher>,
    documents: RwLock<FxHashMap<PathBuf, DocumentHandle>>,
}

impl DocumentRegistry {
    /// Registry whose kernels are launched from `config.kernel`.
    pub fn new(config: EngineConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(config.kernel.clone()));
        Self::with_launcher(config, launcher)
    }

    /// Registry with a custom kernel launcher.
    pub fn with_launcher(config: EngineConfig, launcher: Arc<dyn KernelLauncher>) -> Self {
        Self {
            config,
            launcher,
            documents: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a notebook and register it. Returns its key.
    pub async fn create(&self, location: &Path, name: &str) -> Result<PathBuf> {
        let path = paths::document_path(location, name)?;
        if self.documents.read().await.contains_key(&path) {
            return Err(Error::DocumentExists(path));
        }

        let document = Document::create(location, name, self.launcher.clone(), &self.config).await?;
        self.insert(document).await
    }

    /// Register an existing notebook file. Returns its key.
    pub async fn open(&self, path: &Path) -> Result<PathBuf> {
        let path = paths::existing_document_path(path)?;
        if self.documents.read().await.contains_key(&path) {
            return Err(Error::DocumentExists(path));
        }

        let document = Document::open(&path, self.launcher.clone(), &self.config).await?;
        self.insert(document).await
    }

    async fn insert(&self, mut document: Document) -> Result<PathBuf> {
        let path = document.path().to_path_buf();
        let mut documents = self.documents.write().await;
        if documents.contains_key(&path) {
            drop(documents);
            document.shutdown().await;
            return Err(Error::DocumentExists(path));
        }
        documents.insert(path.clone(), Arc::new(Mutex::new(document)));
        tracing::info!(path = %path.display(), open = documents.len(), "Registered document");
        Ok(path)
    }

    /// Look up an open document.
    pub async fn get(&self, path: &Path) -> Result<DocumentHandle> {
        let key = registry_key(path);
        self.documents
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(Error::DocumentNotFound(key))
    }

    /// Unregister a document and stop its kernel.
    pub async fn close(&self, path: &Path) -> Result<()> {
        let key = registry_key(path);
        let handle = self
            .documents
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| Error::DocumentNotFound(key.clone()))?;

        handle.lock().await.shutdown().await;
        tracing::info!(path = %key.display(), "Closed document");
        Ok(())
    }

    /// Keys of all open documents, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.documents.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Close every document, stopping kernels concurrently.
    pub async fn shutdown_all(&self) {
        let handles: Vec<DocumentHandle> = self
            .documents
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        if handles.is_empty() {
            return;
        }

        tracing::info!("Shutting down {} kernels", handles.len());
        futures::future::join_all(
            handles
                .iter()
                .map(|handle| async move { handle.lock().await.shutdown().await }),
        )
        .await;
    }
}

/// Canonical form of `path` when it exists, else `path` as given.
fn registry_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedKernel;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(kernel: Arc<ScriptedKernel>) -> DocumentRegistry {
        let config = EngineConfig {
            shutdown_grace: Duration::from_millis(200),
            ..EngineConfig::default()
        };
        DocumentRegistry::with_launcher(config, kernel)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let temp = TempDir::new().unwrap();
        let registry = registry(Arc::new(ScriptedKernel::new()));

        let path = registry.create(temp.path(), "a").await.unwrap();
        let handle = registry.get(&path).await.unwrap();
        assert_eq!(handle.lock().await.path(), path);
        assert_eq!(registry.paths().await, vec![path]);
    }

    #[tokio::test]
    async fn test_get_unknown_path() {
        let registry = registry(Arc::new(ScriptedKernel::new()));
        let err = registry.get(Path::new("/nowhere/x.ipynb")).await.err().unwrap();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let temp = TempDir::new().unwrap();
        let kernel = Arc::new(ScriptedKernel::new());
        let registry = registry(kernel.clone());

        registry.create(temp.path(), "a").await.unwrap();
        let err = registry.create(temp.path(), "a.ipynb").await.unwrap_err();
        assert!(matches!(err, Error::DocumentExists(_)));
        assert_eq!(kernel.launches(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_kernel() {
        let temp = TempDir::new().unwrap();
        let kernel = Arc::new(ScriptedKernel::new());
        let registry = registry(kernel.clone());

        let path = registry.create(temp.path(), "a").await.unwrap();
        assert_eq!(kernel.live(), 1);

        registry.close(&path).await.unwrap();
        assert_eq!(kernel.live(), 0);
        assert!(registry.paths().await.is_empty());
        assert!(matches!(
            registry.close(&path).await,
            Err(Error::DocumentNotFound(_))
        ));

        // The file stays and can be opened again.
        registry.open(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_all_stops_every_kernel() {
        let temp = TempDir::new().unwrap();
        let kernel = Arc::new(ScriptedKernel::new());
        let registry = registry(kernel.clone());

        registry.create(temp.path(), "a").await.unwrap();
        registry.create(temp.path(), "b").await.unwrap();
        assert_eq!(kernel.live(), 2);

        registry.shutdown_all().await;
        assert_eq!(kernel.live(), 0);
        assert!(registry.paths().await.is_empty());
    }
}
