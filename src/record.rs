use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ENERGY: &str = "energy";
pub const FORCES: &str = "forces";

pub fn default_properties() -> Vec<String> {
    vec![ENERGY.to_string(), FORCES.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Scalar(f64),
    Vectors(Vec<[f64; 3]>),
}

/// Target properties of one structure, keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyBag(BTreeMap<String, PropertyValue>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(PropertyValue::Scalar(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn vectors(&self, name: &str) -> Option<&[[f64; 3]]> {
        match self.0.get(name) {
            Some(PropertyValue::Vectors(values)) => Some(values),
            _ => None,
        }
    }
}

/// A structure (species and coordinates) paired with its target properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MolecularRecord {
    pub atomic_numbers: Vec<u8>,
    pub positions: Vec<[f64; 3]>,
    pub properties: PropertyBag,
}

impl MolecularRecord {
    pub fn new(
        atomic_numbers: Vec<u8>,
        positions: Vec<[f64; 3]>,
        energy: f64,
        forces: Vec<[f64; 3]>,
    ) -> Self {
        let mut properties = PropertyBag::new();
        properties.insert(ENERGY, PropertyValue::Scalar(energy));
        properties.insert(FORCES, PropertyValue::Vectors(forces));
        Self {
            atomic_numbers,
            positions,
            properties,
        }
    }

    pub fn atom_count(&self) -> usize {
        self.atomic_numbers.len()
    }

    pub fn energy(&self) -> Option<f64> {
        self.properties.scalar(ENERGY)
    }

    pub fn forces(&self) -> Option<&[[f64; 3]]> {
        self.properties.vectors(FORCES)
    }
}
