use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;

use crate::database::{
    AtomisticDatabase, DatabaseBackend, RecordSource, SledBackend, StoreSettings,
};
use crate::domain::Dataset;
use crate::error::MdError;
use crate::fetch::ArchiveFetcher;
use crate::parser::parse_archive;
use crate::registry::{ArchiveEntry, Registry};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub database: String,
    /// The store already existed; nothing was fetched.
    pub skipped: bool,
    pub outcomes: Vec<DatasetOutcome>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.skipped || self.outcomes.iter().all(DatasetOutcome::is_converted)
    }

    pub fn converted_records(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome.status {
                OutcomeStatus::Converted { records } => records,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetOutcome {
    pub dataset: Dataset,
    pub url: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub cleanup_warning: Option<String>,
}

impl DatasetOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self.status, OutcomeStatus::Converted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Converted { records: usize },
    FetchFailed { cause: String, message: String },
    Malformed { message: String },
}

/// Fetch → parse → append for one store at `{dbdir}/{dataset}.db`.
pub struct Pipeline<F: ArchiveFetcher, B: DatabaseBackend = SledBackend> {
    registry: Registry,
    fetcher: F,
    backend: B,
    dbdir: Utf8PathBuf,
    settings: StoreSettings,
    scratch_root: Option<Utf8PathBuf>,
}

impl<F: ArchiveFetcher, B: DatabaseBackend> Pipeline<F, B> {
    pub fn new(
        registry: Registry,
        fetcher: F,
        backend: B,
        dbdir: impl Into<Utf8PathBuf>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            backend,
            dbdir: dbdir.into(),
            settings,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn dbdir(&self) -> &Utf8Path {
        &self.dbdir
    }

    pub fn database_path(&self, dataset: Dataset) -> Utf8PathBuf {
        self.dbdir.join(dataset.database_file_name())
    }

    /// Convert `target` (or, with `force_all`, every registry entry) into the
    /// store of `target`.
    ///
    /// Fetch and parse failures end up in the report: a single-dataset run stops
    /// at the first one, an all-datasets run moves on to the next dataset. Any
    /// other error aborts the run.
    pub fn run(
        &self,
        target: Dataset,
        force_all: bool,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MdError> {
        let entry = self.registry.lookup(target.name())?;
        let db_path = self.database_path(target);

        if self.backend.exists(db_path.as_std_path()) {
            sink.event(ProgressEvent {
                message: "phase=Store; database already present".to_string(),
                elapsed: None,
            });
            tracing::info!(path = %db_path, "database exists, skipping download");
            return Ok(RunReport {
                database: db_path.to_string(),
                skipped: true,
                outcomes: Vec::new(),
            });
        }

        fs::create_dir_all(self.dbdir.as_std_path())
            .map_err(|err| MdError::Filesystem(format!("create {}: {err}", self.dbdir)))?;

        let entries = if force_all {
            self.registry.entries().collect::<Vec<_>>()
        } else {
            vec![entry]
        };

        let mut database = None;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = self.process(&entry, &db_path, &mut database, sink)?;
            let failed = !outcome.is_converted();
            outcomes.push(outcome);
            if failed && !force_all {
                break;
            }
        }

        Ok(RunReport {
            database: db_path.to_string(),
            skipped: false,
            outcomes,
        })
    }

    fn process(
        &self,
        entry: &ArchiveEntry,
        db_path: &Utf8Path,
        database: &mut Option<B::Database>,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetOutcome, MdError> {
        let scratch = self.scratch_dir(entry.dataset)?;
        let result = self.convert(entry, scratch.path(), db_path, database, sink);

        let scratch_path = scratch.path().to_path_buf();
        let cleanup_warning = match scratch.close() {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    dataset = %entry.dataset,
                    path = %scratch_path.display(),
                    "failed to remove scratch directory: {err}"
                );
                Some(format!(
                    "failed to remove scratch directory {}: {err}",
                    scratch_path.display()
                ))
            }
        };

        let status = match result {
            Ok(records) => OutcomeStatus::Converted { records },
            Err(MdError::Fetch { url, cause }) => {
                tracing::error!(
                    dataset = %entry.dataset,
                    url = %url,
                    cause = cause.tag(),
                    "archive download failed: {cause}"
                );
                OutcomeStatus::FetchFailed {
                    cause: cause.tag().to_string(),
                    message: cause.to_string(),
                }
            }
            Err(err @ MdError::MalformedArchive { .. }) => {
                tracing::error!(dataset = %entry.dataset, "{err}");
                OutcomeStatus::Malformed {
                    message: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };

        Ok(DatasetOutcome {
            dataset: entry.dataset,
            url: entry.url.clone(),
            status,
            cleanup_warning,
        })
    }

    fn convert(
        &self,
        entry: &ArchiveEntry,
        scratch: &Path,
        db_path: &Utf8Path,
        database: &mut Option<B::Database>,
        sink: &dyn ProgressSink,
    ) -> Result<usize, MdError> {
        let archive_path = scratch.join(entry.archive_file_name);

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {}", entry.dataset),
            elapsed: None,
        });
        tracing::info!(dataset = %entry.dataset, url = %entry.url, "downloading archive");
        let start = Instant::now();
        self.fetcher.fetch(&entry.url, &archive_path)?;
        sink.event(ProgressEvent {
            message: format!("fetch.response dataset={}", entry.dataset),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: format!("phase=Parse; parsing {}", entry.dataset),
            elapsed: None,
        });
        tracing::info!(dataset = %entry.dataset, "parsing archive");
        let mut records = parse_archive(&archive_path)?.peekable();
        let expected = records.len();
        // Archives are uniform, so the first record shows whether any fits.
        if let Some(first) = records.peek() {
            self.settings.check_record(first)?;
        }

        if database.is_none() {
            *database = Some(self.backend.open(db_path.as_std_path(), &self.settings)?);
        }
        let db = database
            .as_ref()
            .ok_or_else(|| MdError::Database(format!("database {db_path} not open")))?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {expected} records"),
            elapsed: None,
        });
        let start = Instant::now();
        let written = match db.append(records) {
            Ok(written) => written,
            Err(err) => {
                // an empty store would be skipped by the next run
                if db.is_empty() {
                    *database = None;
                    self.discard_store(db_path);
                }
                return Err(err);
            }
        };
        sink.event(ProgressEvent {
            message: format!("store.append dataset={} records={written}", entry.dataset),
            elapsed: Some(start.elapsed()),
        });
        tracing::info!(dataset = %entry.dataset, records = written, "dataset converted");
        Ok(written)
    }

    fn discard_store(&self, db_path: &Utf8Path) {
        if let Err(err) = fs::remove_dir_all(db_path.as_std_path()) {
            tracing::warn!(path = %db_path, "failed to remove empty database: {err}");
        }
    }

    fn scratch_dir(&self, dataset: Dataset) -> Result<TempDir, MdError> {
        let prefix = format!("mdbench-{}-", dataset.name());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let scratch = match &self.scratch_root {
            Some(root) => {
                fs::create_dir_all(root.as_std_path())
                    .map_err(|err| MdError::Filesystem(format!("create {root}: {err}")))?;
                builder.tempdir_in(root.as_std_path())
            }
            None => builder.tempdir(),
        };
        scratch.map_err(|err| MdError::Filesystem(format!("create scratch directory: {err}")))
    }
}
