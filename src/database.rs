use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::environment::{Environment, EnvironmentPolicy};
use crate::error::MdError;
use crate::record::{MolecularRecord, default_properties};

const METADATA_TREE: &str = "meta";
const METADATA_KEY: &[u8] = b"metadata";
const APPEND_BATCH: usize = 1000;

/// Read access shared by stores and subset views.
pub trait RecordSource {
    fn len(&self) -> usize;

    fn read_at(&self, index: usize) -> Result<MolecularRecord, MdError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait AtomisticDatabase: RecordSource {
    fn path(&self) -> &Path;

    fn metadata(&self) -> DatabaseMetadata;

    /// Append `records` in order; returns how many rows were written.
    fn append<I>(&self, records: I) -> Result<usize, MdError>
    where
        I: IntoIterator<Item = MolecularRecord>;

    fn read_with_environment(
        &self,
        index: usize,
    ) -> Result<(MolecularRecord, Environment), MdError> {
        let record = self.read_at(index)?;
        let settings = self.metadata().settings;
        let environment = settings
            .environment
            .environment(&record.positions, settings.collect_triples);
        Ok((record, environment))
    }
}

pub trait DatabaseBackend {
    type Database: AtomisticDatabase;

    fn exists(&self, path: &Path) -> bool;

    fn open(&self, path: &Path, settings: &StoreSettings) -> Result<Self::Database, MdError>;
}

/// Declared layout of a store, fixed when the store is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub properties: Vec<String>,
    #[serde(default)]
    pub environment: EnvironmentPolicy,
    #[serde(default)]
    pub collect_triples: bool,
}

impl StoreSettings {
    /// A record must carry every declared property to be stored.
    pub fn check_record(&self, record: &MolecularRecord) -> Result<(), MdError> {
        match self
            .properties
            .iter()
            .find(|name| !record.properties.contains(name))
        {
            Some(missing) => Err(MdError::Database(format!(
                "record is missing declared property '{missing}'"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            properties: default_properties(),
            environment: EnvironmentPolicy::Simple,
            collect_triples: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub settings: StoreSettings,
    /// Atomic numbers present anywhere in the store.
    pub elements: BTreeSet<u8>,
    pub created_at: String,
    pub tool: String,
}

impl DatabaseMetadata {
    fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            elements: BTreeSet::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("mdbench/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SledBackend;

impl DatabaseBackend for SledBackend {
    type Database = SledDatabase;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open(&self, path: &Path, settings: &StoreSettings) -> Result<SledDatabase, MdError> {
        SledDatabase::open(path, settings)
    }
}

/// Persistent store: one sled tree of bincode rows keyed by big-endian
/// row index, plus a `meta` tree holding JSON metadata.
#[derive(Debug)]
pub struct SledDatabase {
    path: PathBuf,
    db: sled::Db,
    meta: sled::Tree,
    len: AtomicUsize,
    metadata: Mutex<DatabaseMetadata>,
}

impl SledDatabase {
    pub fn open(path: &Path, settings: &StoreSettings) -> Result<Self, MdError> {
        let db = sled::open(path)
            .map_err(|err| MdError::Database(format!("open {}: {err}", path.display())))?;
        let meta = db
            .open_tree(METADATA_TREE)
            .map_err(|err| MdError::Database(err.to_string()))?;

        let metadata = match meta
            .get(METADATA_KEY)
            .map_err(|err| MdError::Database(err.to_string()))?
        {
            Some(bytes) => {
                let stored: DatabaseMetadata = serde_json::from_slice(&bytes)
                    .map_err(|err| MdError::Database(format!("corrupt metadata: {err}")))?;
                if &stored.settings != settings {
                    tracing::debug!(
                        path = %path.display(),
                        "store already declares its own settings; requested settings ignored"
                    );
                }
                stored
            }
            None => {
                let created = DatabaseMetadata::new(settings.clone());
                write_metadata(&meta, &created)?;
                created
            }
        };

        let len = match db.last().map_err(|err| MdError::Database(err.to_string()))? {
            Some((key, _)) => decode_key(&key)? + 1,
            None => 0,
        };

        Ok(Self {
            path: path.to_path_buf(),
            db,
            meta,
            len: AtomicUsize::new(len),
            metadata: Mutex::new(metadata),
        })
    }

    fn lock_metadata(&self) -> Result<std::sync::MutexGuard<'_, DatabaseMetadata>, MdError> {
        self.metadata
            .lock()
            .map_err(|_| MdError::Database("metadata lock poisoned".to_string()))
    }
}

impl RecordSource for SledDatabase {
    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    fn read_at(&self, index: usize) -> Result<MolecularRecord, MdError> {
        let len = self.len();
        if index >= len {
            return Err(MdError::IndexOutOfRange { index, len });
        }
        let bytes = self
            .db
            .get(encode_key(index))
            .map_err(|err| MdError::Database(err.to_string()))?
            .ok_or_else(|| MdError::Database(format!("row {index} missing from store")))?;
        bincode::deserialize(&bytes)
            .map_err(|err| MdError::Database(format!("decode row {index}: {err}")))
    }
}

impl AtomisticDatabase for SledDatabase {
    fn path(&self) -> &Path {
        &self.path
    }

    fn metadata(&self) -> DatabaseMetadata {
        self.metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn append<I>(&self, records: I) -> Result<usize, MdError>
    where
        I: IntoIterator<Item = MolecularRecord>,
    {
        let settings = self.lock_metadata()?.settings.clone();
        let start = self.len();
        let mut elements = BTreeSet::new();
        let mut written = 0usize;
        let mut batch = sled::Batch::default();
        let mut pending = 0usize;

        for record in records {
            let encoded = settings.check_record(&record).and_then(|()| {
                bincode::serialize(&record).map_err(|err| MdError::Database(err.to_string()))
            });
            let value = match encoded {
                Ok(value) => value,
                Err(err) => {
                    self.truncate(start)?;
                    return Err(err);
                }
            };
            elements.extend(record.atomic_numbers.iter().copied());
            batch.insert(&encode_key(start + written + pending)[..], value);
            pending += 1;
            if pending == APPEND_BATCH {
                if let Err(err) = self.commit(std::mem::take(&mut batch), pending) {
                    self.truncate(start)?;
                    return Err(err);
                }
                written += pending;
                pending = 0;
            }
        }
        if pending > 0 {
            if let Err(err) = self.commit(batch, pending) {
                self.truncate(start)?;
                return Err(err);
            }
            written += pending;
        }

        let mut metadata = self.lock_metadata()?;
        if !elements.is_subset(&metadata.elements) {
            metadata.elements.extend(elements);
            write_metadata(&self.meta, &metadata)?;
        }
        self.db
            .flush()
            .map_err(|err| MdError::Database(err.to_string()))?;
        Ok(written)
    }
}

impl SledDatabase {
    fn commit(&self, batch: sled::Batch, rows: usize) -> Result<(), MdError> {
        self.db
            .apply_batch(batch)
            .map_err(|err| MdError::Database(err.to_string()))?;
        self.len.fetch_add(rows, Ordering::SeqCst);
        Ok(())
    }

    /// Drop rows from `len` on; an append either lands whole or not at all.
    fn truncate(&self, len: usize) -> Result<(), MdError> {
        let mut batch = sled::Batch::default();
        for index in len..self.len() {
            batch.remove(&encode_key(index)[..]);
        }
        self.db
            .apply_batch(batch)
            .map_err(|err| MdError::Database(err.to_string()))?;
        self.len.store(len, Ordering::SeqCst);
        Ok(())
    }
}

fn write_metadata(tree: &sled::Tree, metadata: &DatabaseMetadata) -> Result<(), MdError> {
    let bytes = serde_json::to_vec(metadata).map_err(|err| MdError::Database(err.to_string()))?;
    tree.insert(METADATA_KEY, bytes)
        .map_err(|err| MdError::Database(err.to_string()))?;
    Ok(())
}

fn encode_key(index: usize) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

fn decode_key(key: &[u8]) -> Result<usize, MdError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| MdError::Database(format!("unexpected row key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes) as usize)
}

/// Volatile store for tests and throwaway conversions.
#[derive(Debug)]
pub struct InMemoryDatabase {
    path: PathBuf,
    records: RwLock<Vec<MolecularRecord>>,
    metadata: RwLock<DatabaseMetadata>,
}

impl InMemoryDatabase {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            records: RwLock::new(Vec::new()),
            metadata: RwLock::new(DatabaseMetadata::new(settings)),
        }
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

impl RecordSource for InMemoryDatabase {
    fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    fn read_at(&self, index: usize) -> Result<MolecularRecord, MdError> {
        let records = self
            .records
            .read()
            .map_err(|_| MdError::Database("record lock poisoned".to_string()))?;
        records.get(index).cloned().ok_or(MdError::IndexOutOfRange {
            index,
            len: records.len(),
        })
    }
}

impl AtomisticDatabase for InMemoryDatabase {
    fn path(&self) -> &Path {
        &self.path
    }

    fn metadata(&self) -> DatabaseMetadata {
        self.metadata
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn append<I>(&self, records: I) -> Result<usize, MdError>
    where
        I: IntoIterator<Item = MolecularRecord>,
    {
        let mut metadata = self
            .metadata
            .write()
            .map_err(|_| MdError::Database("metadata lock poisoned".to_string()))?;
        let mut rows = self
            .records
            .write()
            .map_err(|_| MdError::Database("record lock poisoned".to_string()))?;
        let mut incoming = Vec::new();
        for record in records {
            metadata.settings.check_record(&record)?;
            incoming.push(record);
        }
        for record in &incoming {
            metadata
                .elements
                .extend(record.atomic_numbers.iter().copied());
        }
        let written = incoming.len();
        rows.extend(incoming);
        Ok(written)
    }
}
