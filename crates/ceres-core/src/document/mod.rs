//! Documents: ordered cells, their index and a kernel session.
//!
//! Every mutation is staged on a copy of the stored notebook, written
//! atomically, and only then committed to memory. A failed write leaves
//! both the file and the in-memory document as they were.

mod cell;
mod ids;
mod index;

pub use cell::{Cell, CellId, CellKind, CellSnapshot, CellWithOutput};
pub use ids::{IdGenerator, MAX_ID_ATTEMPTS, RandomIds};
pub use index::CellIndex;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;

use ceres_ipynb::{JupyterCell, JupyterNotebook, is_valid_cell_id};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kernel::{KernelLauncher, KernelSession, KernelState};
use crate::paths;

/// A notebook backed by a file and a live kernel.
pub struct Document {
    path: PathBuf,
    notebook: JupyterNotebook,
    index: CellIndex,
    kernel: KernelSession,
    ids: Arc<dyn IdGenerator>,
    execution_timeout: Option<Duration>,
    /// Executions since the kernel was last (re)started.
    execution_count: u32,
}

impl Document {
    /// Create a new, empty notebook `name` in `location` and start its kernel.
    ///
    /// Refuses to overwrite an existing file; use [`Document::open`] for that.
    pub async fn create(
        location: &Path,
        name: &str,
        launcher: Arc<dyn KernelLauncher>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let path = paths::document_path(location, name)?;
        if path.exists() {
            return Err(Error::storage(&path, "file already exists"));
        }

        let mut kernel = KernelSession::start(launcher, config).await?;

        let mut notebook = JupyterNotebook::new();
        notebook.stamp();
        if let Err(e) = notebook.write_to_file(&path) {
            kernel.shutdown().await;
            return Err(e.into());
        }

        tracing::info!(path = %path.display(), "Created document");
        Ok(Self {
            path,
            notebook,
            index: CellIndex::new(),
            kernel,
            ids: Arc::new(RandomIds),
            execution_timeout: config.execution_timeout,
            execution_count: 0,
        })
    }

    /// Load an existing notebook file and start its kernel.
    ///
    /// The cell index is rebuilt from persisted cell ids. Cells without a
    /// usable id (missing, invalid or repeated) get a fresh one, and the
    /// file is rewritten so those ids are durable.
    pub async fn open(
        path: &Path,
        launcher: Arc<dyn KernelLauncher>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let path = paths::existing_document_path(path)?;
        let mut notebook = JupyterNotebook::read_from_file(&path)?;

        let ids: Arc<dyn IdGenerator> = Arc::new(RandomIds);
        let (index, assigned) = rebuild_index(&mut notebook, ids.as_ref())?;
        if assigned > 0 {
            notebook.stamp();
            notebook.write_to_file(&path)?;
            tracing::info!(
                path = %path.display(),
                "Assigned ids to {} cells",
                assigned
            );
        }

        let kernel = KernelSession::start(launcher, config).await?;

        tracing::info!(path = %path.display(), cells = index.len(), "Opened document");
        Ok(Self {
            path,
            notebook,
            index,
            kernel,
            ids,
            execution_timeout: config.execution_timeout,
            execution_count: 0,
        })
    }

    /// Storage path; the document's registry key.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the source of new cell ids.
    pub fn set_id_generator(&mut self, ids: Arc<dyn IdGenerator>) {
        self.ids = ids;
    }

    pub fn kernel_state(&self) -> KernelState {
        self.kernel.state()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Append a cell and persist it.
    pub fn add_cell(&mut self, kind: CellKind, source: &str) -> Result<Cell> {
        let id = ids::fresh_id(self.ids.as_ref(), |c| self.index.contains(c))?;
        let position = self.notebook.cells.len();

        let mut index = self.index.clone();
        index.add(id.clone(), position)?;

        let mut staged = self.notebook.clone();
        staged.cells.push(kind.new_stored(&id, source));
        self.persist(staged)?;
        self.index = index;

        tracing::debug!(cell = %id, position, "Added {} cell", kind);
        self.cell_at(position)
    }

    /// Replace a cell's source and persist it. Recorded outputs are kept.
    pub fn set_source(&mut self, id: &str, source: &str) -> Result<Cell> {
        let position = self.index.resolve(id)?;

        let mut staged = self.notebook.clone();
        match staged.cells.get_mut(position) {
            Some(
                JupyterCell::Code { source: s, .. }
                | JupyterCell::Markdown { source: s, .. }
                | JupyterCell::Raw { source: s, .. },
            ) => *s = source.to_string(),
            None => return Err(self.out_of_range(position)),
        }
        self.persist(staged)?;

        self.cell_at(position)
    }

    /// All cells in order.
    pub fn cells(&self) -> Vec<Cell> {
        self.notebook.cells.iter().map(Cell::from_stored).collect()
    }

    /// One cell, including its recorded outputs.
    pub fn cell(&self, id: &str) -> Result<Cell> {
        let position = self.index.resolve(id)?;
        self.cell_at(position)
    }

    /// Run a code cell and record its outputs.
    ///
    /// The cell's previous outputs are replaced. Text cells are returned
    /// unchanged without contacting the kernel. On timeout the kernel is
    /// interrupted (or restarted) and `ExecutionTimeout` is returned with
    /// nothing recorded.
    pub async fn execute_cell(&mut self, id: &str) -> Result<CellWithOutput> {
        let position = self.index.resolve(id)?;
        let stored = self
            .notebook
            .cells
            .get(position)
            .ok_or_else(|| self.out_of_range(position))?;
        if !matches!(stored, JupyterCell::Code { .. }) {
            return Ok(self.cell_at(position)?.with_output(&self.path));
        }
        let source = stored.source().to_string();

        let msg_id = self.kernel.submit(&source)?;
        let drained = self
            .kernel
            .drain(&msg_id, self.execution_timeout)
            .collect()
            .await;
        let outputs = match drained {
            Ok(outputs) => outputs,
            Err(Error::ExecutionTimeout(budget)) => {
                tracing::warn!(cell = id, "Execution timed out after {:?}", budget);
                if let Err(e) = self.kernel.recover(&msg_id).await {
                    tracing::error!(cell = id, "Kernel recovery failed: {}", e);
                }
                return Err(Error::ExecutionTimeout(budget));
            }
            Err(e) => return Err(e),
        };

        let count = self.execution_count + 1;
        let mut staged = self.notebook.clone();
        if let Some(JupyterCell::Code {
            outputs: recorded,
            execution_count,
            ..
        }) = staged.cells.get_mut(position)
        {
            *recorded = outputs;
            *execution_count = Some(count);
        }
        self.persist(staged)?;
        self.execution_count = count;

        tracing::debug!(cell = id, execution_count = count, "Executed cell");
        Ok(self.cell_at(position)?.with_output(&self.path))
    }

    /// Replace the kernel. Cells and recorded outputs are untouched.
    pub async fn restart_kernel(&mut self) -> Result<()> {
        self.kernel.restart().await?;
        self.execution_count = 0;
        Ok(())
    }

    /// Stop the kernel. Idempotent.
    pub async fn shutdown(&mut self) {
        self.kernel.shutdown().await;
    }

    fn persist(&mut self, mut staged: JupyterNotebook) -> Result<()> {
        staged.stamp();
        staged.write_to_file(&self.path)?;
        self.notebook = staged;
        Ok(())
    }

    fn cell_at(&self, position: usize) -> Result<Cell> {
        self.notebook
            .cells
            .get(position)
            .map(Cell::from_stored)
            .ok_or_else(|| self.out_of_range(position))
    }

    fn out_of_range(&self, position: usize) -> Error {
        Error::OutOfRange {
            position,
            len: self.notebook.cells.len(),
        }
    }
}

/// Build the index from persisted ids, assigning ids where needed.
///
/// Returns the index and the number of cells that got a new id.
fn rebuild_index(
    notebook: &mut JupyterNotebook,
    generator: &dyn IdGenerator,
) -> Result<(CellIndex, usize)> {
    // First valid occurrence of each id keeps it.
    let mut seen = FxHashSet::default();
    let keep: Vec<bool> = notebook
        .cells
        .iter()
        .map(|cell| {
            cell.id()
                .is_some_and(|id| is_valid_cell_id(id) && seen.insert(id.to_string()))
        })
        .collect();

    let mut index = CellIndex::new();
    let mut assigned = 0;
    for (position, (cell, keep)) in notebook.cells.iter_mut().zip(keep).enumerate() {
        let existing = if keep { cell.id().map(CellId::new) } else { None };
        let id = match existing {
            Some(id) => id,
            None => {
                let id = ids::fresh_id(generator, |c| seen.contains(c) || index.contains(c))?;
                cell.set_id(id.as_str());
                assigned += 1;
                id
            }
        };
        index.add(id, position)?;
    }
    Ok((index, assigned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedKernel;
    use tempfile::TempDir;

    fn config() -> EngineConfig {
        EngineConfig {
            execution_timeout: Some(Duration::from_secs(5)),
            interrupt_grace: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(200),
            ..EngineConfig::default()
        }
    }

    async fn create(temp: &TempDir) -> Document {
        Document::create(temp.path(), "test", Arc::new(ScriptedKernel::new()), &config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_empty_notebook() {
        let temp = TempDir::new().unwrap();
        let document = create(&temp).await;

        assert!(document.path().ends_with("test.ipynb"));
        let stored = JupyterNotebook::read_from_file(document.path()).unwrap();
        assert!(stored.cells.is_empty());
        assert_eq!(stored.nbformat_minor, 5);
        assert_eq!(document.kernel_state(), KernelState::Ready);
    }

    #[tokio::test]
    async fn test_create_refuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let _first = create(&temp).await;
        let err = Document::create(temp.path(), "test", Arc::new(ScriptedKernel::new()), &config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[tokio::test]
    async fn test_add_cell_persists_with_id() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;

        let cell = document.add_cell(CellKind::Code, "x = 1").unwrap();
        assert_eq!(cell.kind, CellKind::Code);
        assert!(cell.outputs.is_empty());

        let stored = JupyterNotebook::read_from_file(document.path()).unwrap();
        assert_eq!(stored.cells.len(), 1);
        assert_eq!(stored.cells[0].id(), Some(cell.id.as_str()));
        assert_eq!(stored.cells[0].source(), "x = 1");
    }

    #[tokio::test]
    async fn test_text_cell_is_not_executed() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;

        let cell = document.add_cell(CellKind::Text, "# Title").unwrap();
        let executed = document.execute_cell(cell.id.as_str()).await.unwrap();
        assert!(executed.output.is_empty());
        assert_eq!(executed.cell.cell_type, CellKind::Text);

        let stored = JupyterNotebook::read_from_file(document.path()).unwrap();
        assert_eq!(stored.cells[0].cell_type(), "markdown");
    }

    #[tokio::test]
    async fn test_execution_counter_resets_on_restart() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;
        let cell = document.add_cell(CellKind::Code, "1").unwrap();

        document.execute_cell(cell.id.as_str()).await.unwrap();
        let second = document.execute_cell(cell.id.as_str()).await.unwrap();
        assert_eq!(second.execution_count, Some(2));

        document.restart_kernel().await.unwrap();
        let third = document.execute_cell(cell.id.as_str()).await.unwrap();
        assert_eq!(third.execution_count, Some(1));
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;
        document.add_cell(CellKind::Code, "1").unwrap();

        std::fs::remove_dir_all(temp.path()).unwrap();

        let err = document.add_cell(CellKind::Code, "2").unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert_eq!(document.len(), 1);
        assert_eq!(document.cells().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_set_source_keeps_old_source() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;
        let cell = document.add_cell(CellKind::Code, "1").unwrap();

        std::fs::remove_dir_all(temp.path()).unwrap();

        let err = document.set_source(cell.id.as_str(), "2").unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert_eq!(document.cell(cell.id.as_str()).unwrap().source, "1");
    }

    #[tokio::test]
    async fn test_failed_execute_write_keeps_previous_outputs() {
        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;
        let assign = document.add_cell(CellKind::Code, "x = 1").unwrap();
        let show = document.add_cell(CellKind::Code, "x").unwrap();
        let reassign = document.add_cell(CellKind::Code, "x = 5").unwrap();

        document.execute_cell(assign.id.as_str()).await.unwrap();
        let first = document.execute_cell(show.id.as_str()).await.unwrap();
        assert_eq!(first.output, vec!["1"]);
        assert_eq!(first.execution_count, Some(2));

        std::fs::remove_dir_all(temp.path()).unwrap();

        let err = document.execute_cell(reassign.id.as_str()).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        let err = document.execute_cell(show.id.as_str()).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));

        let kept = document.cell(show.id.as_str()).unwrap();
        assert_eq!(kept.output_text(), vec!["1"]);
        assert_eq!(kept.execution_count, Some(2));

        // Failed writes did not advance the counter.
        std::fs::create_dir_all(temp.path()).unwrap();
        let retried = document.execute_cell(show.id.as_str()).await.unwrap();
        assert_eq!(retried.output, vec!["5"]);
        assert_eq!(retried.execution_count, Some(3));
        let stored = JupyterNotebook::read_from_file(document.path()).unwrap();
        assert_eq!(stored.cells[1].execution_count(), Some(3));
    }

    #[tokio::test]
    async fn test_sibling_documents_write_concurrently() {
        let temp = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedKernel::new());
        let mut text = Document::create(temp.path(), "nb.txt", launcher.clone(), &config())
            .await
            .unwrap();
        let mut notebook = Document::create(temp.path(), "nb.ipynb", launcher, &config())
            .await
            .unwrap();

        std::thread::scope(|scope| {
            for (document, prefix) in [(&mut text, "t"), (&mut notebook, "n")] {
                scope.spawn(move || {
                    for i in 0..100 {
                        document
                            .add_cell(CellKind::Code, &format!("{prefix}{i}"))
                            .unwrap();
                    }
                });
            }
        });

        for (document, prefix) in [(&text, "t"), (&notebook, "n")] {
            assert_eq!(document.len(), 100);
            let stored = JupyterNotebook::read_from_file(document.path()).unwrap();
            assert_eq!(stored.cells.len(), 100);
            assert!(stored.cells.iter().all(|c| c.source().starts_with(prefix)));
        }
    }

    #[tokio::test]
    async fn test_open_malformed_file_names_it() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.ipynb");
        std::fs::write(&path, "{not json").unwrap();

        let err = Document::open(&path, Arc::new(ScriptedKernel::new()), &config())
            .await
            .err()
            .unwrap();
        match err {
            Error::Storage { path: reported, .. } => {
                assert_eq!(reported, path.canonicalize().unwrap())
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_id_exhaustion_surfaces_duplicate() {
        struct Constant;
        impl IdGenerator for Constant {
            fn generate(&self) -> String {
                "samesame".to_string()
            }
        }

        let temp = TempDir::new().unwrap();
        let mut document = create(&temp).await;
        document.set_id_generator(Arc::new(Constant));

        document.add_cell(CellKind::Code, "1").unwrap();
        let err = document.add_cell(CellKind::Code, "2").unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
        assert_eq!(document.len(), 1);
    }

    #[test]
    fn test_rebuild_index_repairs_ids() {
        let mut notebook = JupyterNotebook::new();
        notebook.cells.push(JupyterCell::code("keep0001", "a"));
        notebook.cells.push(JupyterCell::code("keep0001", "b"));
        notebook.cells.push(JupyterCell::code("bad id!", "c"));
        let mut missing = JupyterCell::markdown("x", "d");
        if let JupyterCell::Markdown { id, .. } = &mut missing {
            *id = None;
        }
        notebook.cells.push(missing);

        let (index, assigned) = rebuild_index(&mut notebook, &RandomIds).unwrap();
        assert_eq!(assigned, 3);
        assert_eq!(index.len(), 4);
        assert_eq!(index.resolve("keep0001").unwrap(), 0);
        for (position, cell) in notebook.cells.iter().enumerate() {
            let id = cell.id().unwrap();
            assert!(is_valid_cell_id(id));
            assert_eq!(index.resolve(id).unwrap(), position);
        }
    }
}
