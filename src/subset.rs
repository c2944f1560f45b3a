use std::sync::Arc;

use crate::database::RecordSource;
use crate::error::MdError;
use crate::record::MolecularRecord;

/// Read-only, index-remapped view over a store.
///
/// The mapping always points straight into the root store: taking a subset
/// of a subset composes the two mappings up front, so every read is a single
/// lookup regardless of nesting depth.
#[derive(Debug)]
pub struct Subset<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    indices: Arc<[usize]>,
}

impl<S: RecordSource + ?Sized> Clone for Subset<'_, S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            indices: Arc::clone(&self.indices),
        }
    }
}

impl<'a, S: RecordSource + ?Sized> Subset<'a, S> {
    pub fn new(source: &'a S, indices: &[usize]) -> Result<Self, MdError> {
        check_bounds(indices, source.len())?;
        Ok(Self {
            source,
            indices: indices.into(),
        })
    }

    /// Subset of this subset: local index `i` maps to `self.indices[indices[i]]`.
    pub fn subset(&self, indices: &[usize]) -> Result<Subset<'a, S>, MdError> {
        check_bounds(indices, self.indices.len())?;
        let composed = indices
            .iter()
            .map(|&local| self.indices[local])
            .collect::<Vec<_>>();
        Ok(Subset {
            source: self.source,
            indices: composed.into(),
        })
    }

    pub fn source(&self) -> &'a S {
        self.source
    }

    /// Row indices into the root store.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<MolecularRecord, MdError>> + '_ {
        (0..self.indices.len()).map(|local| self.read_at(local))
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Subset<'_, S> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn read_at(&self, index: usize) -> Result<MolecularRecord, MdError> {
        let backing = *self.indices.get(index).ok_or(MdError::IndexOutOfRange {
            index,
            len: self.indices.len(),
        })?;
        self.source.read_at(backing)
    }
}

fn check_bounds(indices: &[usize], len: usize) -> Result<(), MdError> {
    match indices.iter().find(|&&index| index >= len) {
        Some(&index) => Err(MdError::IndexOutOfRange { index, len }),
        None => Ok(()),
    }
}

/// `create_subset` for anything that can back a view.
pub trait CreateSubset {
    type Root: RecordSource + ?Sized;

    fn create_subset(&self, indices: &[usize]) -> Result<Subset<'_, Self::Root>, MdError>;
}

impl<S: RecordSource + ?Sized> CreateSubset for Subset<'_, S> {
    type Root = S;

    fn create_subset(&self, indices: &[usize]) -> Result<Subset<'_, S>, MdError> {
        self.subset(indices)
    }
}

impl CreateSubset for crate::database::SledDatabase {
    type Root = Self;

    fn create_subset(&self, indices: &[usize]) -> Result<Subset<'_, Self>, MdError> {
        Subset::new(self, indices)
    }
}

impl CreateSubset for crate::database::InMemoryDatabase {
    type Root = Self;

    fn create_subset(&self, indices: &[usize]) -> Result<Subset<'_, Self>, MdError> {
        Subset::new(self, indices)
    }
}
