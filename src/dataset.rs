use camino::{Utf8Path, Utf8PathBuf};

use crate::config::ResolvedConfig;
use crate::database::{
    AtomisticDatabase, DatabaseMetadata, RecordSource, SledBackend, SledDatabase,
};
use crate::domain::Dataset;
use crate::environment::EnvironmentPolicy;
use crate::error::MdError;
use crate::fetch::ArchiveFetcher;
use crate::pipeline::{Pipeline, ProgressSink, RunReport};
use crate::record::MolecularRecord;
use crate::registry::Registry;
use crate::subset::{CreateSubset, Subset};

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Download and convert when the store is missing.
    pub download: bool,
    /// Convert every registry dataset into this store, not just the requested one.
    pub parse_all: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            download: true,
            parse_all: false,
        }
    }
}

/// An MD17 molecule backed by its store at `{dbdir}/{dataset}.db`.
#[derive(Debug)]
pub struct Md17 {
    dataset: Dataset,
    path: Utf8PathBuf,
    database: SledDatabase,
    last_run: Option<RunReport>,
}

/// Pipeline writing into the stores under `config.dbdir`.
pub fn pipeline<F: ArchiveFetcher>(config: &ResolvedConfig, fetcher: F) -> Pipeline<F> {
    let pipeline = Pipeline::new(
        Registry::new(config.base_url.clone()),
        fetcher,
        SledBackend,
        config.dbdir.clone(),
        config.store.clone(),
    );
    match &config.scratch_dir {
        Some(scratch) => pipeline.with_scratch_root(scratch.clone()),
        None => pipeline,
    }
}

impl Md17 {
    pub fn load<F: ArchiveFetcher>(
        config: &ResolvedConfig,
        dataset: Dataset,
        fetcher: F,
        options: LoadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Self, MdError> {
        let pipeline = pipeline(config, fetcher);
        let path = pipeline.database_path(dataset);

        let last_run = if options.download {
            let report = pipeline.run(dataset, options.parse_all, sink)?;
            if !report.success() {
                tracing::warn!(dataset = %dataset, "conversion finished with failures");
            }
            Some(report)
        } else {
            None
        };

        Self::open_existing(dataset, path, config, last_run)
    }

    /// Open a store that was converted earlier, without touching the network.
    pub fn open(config: &ResolvedConfig, dataset: Dataset) -> Result<Self, MdError> {
        let path = config.dbdir.join(dataset.database_file_name());
        Self::open_existing(dataset, path, config, None)
    }

    fn open_existing(
        dataset: Dataset,
        path: Utf8PathBuf,
        config: &ResolvedConfig,
        last_run: Option<RunReport>,
    ) -> Result<Self, MdError> {
        if !path.as_std_path().exists() {
            return Err(MdError::DatasetNotFound(format!("{dataset} ({path})")));
        }
        let database = SledDatabase::open(path.as_std_path(), &config.store)?;
        Ok(Self {
            dataset,
            path,
            database,
            last_run,
        })
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn database(&self) -> &SledDatabase {
        &self.database
    }

    pub fn metadata(&self) -> DatabaseMetadata {
        self.database.metadata()
    }

    pub fn properties(&self) -> Vec<String> {
        self.database.metadata().settings.properties
    }

    pub fn environment(&self) -> EnvironmentPolicy {
        self.database.metadata().settings.environment
    }

    /// Report of the conversion run performed by [`Md17::load`], if any.
    pub fn last_run(&self) -> Option<&RunReport> {
        self.last_run.as_ref()
    }
}

impl RecordSource for Md17 {
    fn len(&self) -> usize {
        self.database.len()
    }

    fn read_at(&self, index: usize) -> Result<MolecularRecord, MdError> {
        self.database.read_at(index)
    }
}

impl CreateSubset for Md17 {
    type Root = SledDatabase;

    fn create_subset(&self, indices: &[usize]) -> Result<Subset<'_, SledDatabase>, MdError> {
        Subset::new(&self.database, indices)
    }
}
