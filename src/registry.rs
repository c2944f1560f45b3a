use crate::domain::Dataset;
use crate::error::MdError;

pub const DEFAULT_BASE_URL: &str = "http://www.quantum-machine.org/gdml/data/npz/";

/// Where one logical dataset lives remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub dataset: Dataset,
    pub archive_file_name: &'static str,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Registry {
    base_url: String,
    datasets: Vec<Dataset>,
}

impl Registry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_datasets(base_url, &Dataset::ALL)
    }

    /// Registry restricted to `datasets`, kept in the given order.
    pub fn with_datasets(base_url: impl Into<String>, datasets: &[Dataset]) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let mut unique = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            if !unique.contains(dataset) {
                unique.push(*dataset);
            }
        }
        Self {
            base_url,
            datasets: unique,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn entry(&self, dataset: Dataset) -> ArchiveEntry {
        ArchiveEntry {
            dataset,
            archive_file_name: dataset.archive_file_name(),
            url: format!("{}{}", self.base_url, dataset.archive_file_name()),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<ArchiveEntry, MdError> {
        let dataset: Dataset = name.parse()?;
        if !self.datasets.contains(&dataset) {
            return Err(MdError::UnknownDataset(name.to_string()));
        }
        Ok(self.entry(dataset))
    }

    pub fn contains(&self, dataset: Dataset) -> bool {
        self.datasets.contains(&dataset)
    }

    pub fn entries(&self) -> impl Iterator<Item = ArchiveEntry> + '_ {
        self.datasets.iter().map(|dataset| self.entry(*dataset))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
