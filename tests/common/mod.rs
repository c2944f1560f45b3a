#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use mdbench::error::{FetchCause, MdError};
use mdbench::fetch::ArchiveFetcher;
use mdbench::npy::{encode_f64, encode_u8};
use mdbench::pipeline::{ProgressEvent, ProgressSink};

pub struct Molecule {
    pub numbers: Vec<u8>,
    pub energies: Vec<f64>,
}

impl Molecule {
    pub fn new(numbers: &[u8], energies: &[f64]) -> Self {
        Self {
            numbers: numbers.to_vec(),
            energies: energies.to_vec(),
        }
    }

    pub fn structures(&self) -> usize {
        self.energies.len()
    }

    /// Position of `atom` in structure `index`; forces mirror positions.
    pub fn coordinate(index: usize, atom: usize) -> [f64; 3] {
        [index as f64, atom as f64 * 0.5, 1.0]
    }

    fn coordinates(&self) -> Vec<f64> {
        (0..self.structures())
            .flat_map(|index| {
                (0..self.numbers.len()).flat_map(move |atom| Self::coordinate(index, atom))
            })
            .collect()
    }

    pub fn npz(&self) -> Vec<u8> {
        let shape = [self.structures(), self.numbers.len(), 3];
        let coordinates = self.coordinates();
        let forces = coordinates.iter().map(|value| -value).collect::<Vec<_>>();
        npz(&[
            ("z", encode_u8(&[self.numbers.len()], &self.numbers)),
            ("R", encode_f64(&shape, &coordinates)),
            ("E", encode_f64(&[self.structures(), 1], &self.energies)),
            ("F", encode_f64(&shape, &forces)),
        ])
    }
}

pub fn npz(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (key, bytes) in members {
        writer
            .start_file(format!("{key}.npy"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_npz(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Serves archives by file name; anything else is a 404.
#[derive(Default)]
pub struct MockFetcher {
    archives: HashMap<String, Vec<u8>>,
    failures: HashMap<String, FetchCause>,
    pub calls: Mutex<Vec<String>>,
    pub destinations: Mutex<Vec<PathBuf>>,
}

impl MockFetcher {
    pub fn with_archive(mut self, file_name: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(file_name.to_string(), bytes);
        self
    }

    pub fn with_failure(mut self, file_name: &str, cause: FetchCause) -> Self {
        self.failures.insert(file_name.to_string(), cause);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ArchiveFetcher for MockFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), MdError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.destinations
            .lock()
            .unwrap()
            .push(destination.to_path_buf());
        let file_name = url.rsplit('/').next().unwrap_or_default();
        if let Some(cause) = self.failures.get(file_name) {
            return Err(MdError::Fetch {
                url: url.to_string(),
                cause: cause.clone(),
            });
        }
        match self.archives.get(file_name) {
            Some(bytes) => {
                fs::write(destination, bytes).map_err(|err| MdError::Filesystem(err.to_string()))
            }
            None => Err(MdError::Fetch {
                url: url.to_string(),
                cause: FetchCause::Status(404),
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}
