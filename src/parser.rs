use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::MdError;
use crate::npy::NpyArray;
use crate::record::MolecularRecord;

pub const ATOMIC_NUMBERS_KEY: &str = "z";
pub const POSITIONS_KEY: &str = "R";
pub const ENERGIES_KEY: &str = "E";
pub const FORCES_KEY: &str = "F";

const MAX_ATOMIC_NUMBER: i128 = 118;
/// Upper bound on trusting a member's declared size when reserving memory.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Open an `.npz` archive and validate it completely before any record is
/// produced. A malformed archive yields an error and no records.
pub fn parse_archive(path: &Path) -> Result<RecordStream, MdError> {
    let file = File::open(path)
        .map_err(|err| MdError::Filesystem(format!("open archive {}: {err}", path.display())))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| MdError::malformed(path, format!("not an npz archive: {err}")))?;

    let numbers = read_member(&mut archive, path, ATOMIC_NUMBERS_KEY)?;
    let positions = read_member(&mut archive, path, POSITIONS_KEY)?;
    let energies = read_member(&mut archive, path, ENERGIES_KEY)?;
    let forces = read_member(&mut archive, path, FORCES_KEY)?;

    RecordStream::new(path, numbers, positions, energies, forces)
}

fn read_member(
    archive: &mut ZipArchive<File>,
    path: &Path,
    key: &str,
) -> Result<NpyArray, MdError> {
    let member = format!("{key}.npy");
    let mut entry = match archive.by_name(&member) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(MdError::malformed(path, format!("missing field '{key}'")));
        }
        Err(err) => return Err(MdError::malformed(path, format!("{member}: {err}"))),
    };
    let capacity = entry.size().min(MAX_PREALLOCATION) as usize;
    let mut bytes = Vec::with_capacity(capacity);
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| MdError::malformed(path, format!("{member}: {err}")))?;
    NpyArray::from_bytes(bytes).map_err(|err| MdError::malformed(path, format!("{member}: {err}")))
}

/// Lazily yields one record per structure, in archive order.
///
/// Single pass: once exhausted, parse the archive again to re-read it.
#[derive(Debug)]
pub struct RecordStream {
    path: PathBuf,
    atomic_numbers: Vec<u8>,
    positions: NpyArray,
    energies: NpyArray,
    forces: NpyArray,
    next: usize,
    len: usize,
}

impl RecordStream {
    fn new(
        path: &Path,
        numbers: NpyArray,
        positions: NpyArray,
        energies: NpyArray,
        forces: NpyArray,
    ) -> Result<Self, MdError> {
        let malformed = |details: String| MdError::malformed(path, details);

        if numbers.shape().len() != 1 || !numbers.dtype().is_integer() {
            return Err(malformed(format!(
                "atomic numbers must be a 1-D integer array, got shape {:?}",
                numbers.shape()
            )));
        }
        let atoms = numbers.len();
        let atomic_numbers = (0..atoms)
            .map(|index| {
                let value = numbers.i128_at(index);
                if (1..=MAX_ATOMIC_NUMBER).contains(&value) {
                    Ok(value as u8)
                } else {
                    Err(malformed(format!(
                        "invalid atomic number {value} at index {index}"
                    )))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (name, array) in [("positions", &positions), ("forces", &forces)] {
            let shape = array.shape();
            if shape.len() != 3 || shape[2] != 3 || !array.dtype().is_float() {
                return Err(malformed(format!(
                    "{name} must be a float array shaped (structures, atoms, 3), got {shape:?}"
                )));
            }
            if shape[1] != atoms {
                return Err(malformed(format!(
                    "{name} has {} atoms per structure, atomic numbers list {atoms}",
                    shape[1]
                )));
            }
        }

        let energy_shape = energies.shape();
        let energies_ok = match energy_shape {
            [_] => true,
            [_, 1] => true,
            _ => false,
        };
        if !energies_ok || !energies.dtype().is_float() {
            return Err(malformed(format!(
                "energies must be a float array shaped (structures,) or (structures, 1), got {energy_shape:?}"
            )));
        }

        let structures = positions.shape()[0];
        if energy_shape[0] != structures || forces.shape()[0] != structures {
            return Err(malformed(format!(
                "mismatched structure counts: positions={structures}, energies={}, forces={}",
                energy_shape[0],
                forces.shape()[0]
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            atomic_numbers,
            positions,
            energies,
            forces,
            next: 0,
            len: structures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn atomic_numbers(&self) -> &[u8] {
        &self.atomic_numbers
    }

    pub fn structure_count(&self) -> usize {
        self.len
    }
}

impl Iterator for RecordStream {
    type Item = MolecularRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let atoms = self.atomic_numbers.len();
        Some(MolecularRecord::new(
            self.atomic_numbers.clone(),
            self.positions.vec3_row(index, atoms),
            self.energies.f64_at(index),
            self.forces.vec3_row(index, atoms),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RecordStream {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energies_column_vector_uses_first_column() {
        let numbers = NpyArray::from_bytes(crate::npy::encode_u8(&[1], &[1])).unwrap();
        let positions =
            NpyArray::from_bytes(crate::npy::encode_f64(&[2, 1, 3], &[0.0; 6])).unwrap();
        let forces = positions.clone();
        let energies =
            NpyArray::from_bytes(crate::npy::encode_f64(&[2, 1], &[-3.0, -4.0])).unwrap();

        let stream =
            RecordStream::new(Path::new("inline.npz"), numbers, positions, energies, forces)
                .unwrap();
        let energies = stream.map(|record| record.energy().unwrap()).collect::<Vec<_>>();
        assert_eq!(energies, vec![-3.0, -4.0]);
    }
}
