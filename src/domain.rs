use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MdError;

/// One MD17 molecule with its DFT reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Dataset {
    Aspirin,
    Azobenzene,
    Benzene,
    Ethanol,
    Malonaldehyde,
    Naphthalene,
    Paracetamol,
    SalicylicAcid,
    Toluene,
    Uracil,
}

impl Dataset {
    pub const ALL: [Dataset; 10] = [
        Dataset::Aspirin,
        Dataset::Azobenzene,
        Dataset::Benzene,
        Dataset::Ethanol,
        Dataset::Malonaldehyde,
        Dataset::Naphthalene,
        Dataset::Paracetamol,
        Dataset::SalicylicAcid,
        Dataset::Toluene,
        Dataset::Uracil,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dataset::Aspirin => "aspirin",
            Dataset::Azobenzene => "azobenzene",
            Dataset::Benzene => "benzene",
            Dataset::Ethanol => "ethanol",
            Dataset::Malonaldehyde => "malonaldehyde",
            Dataset::Naphthalene => "naphthalene",
            Dataset::Paracetamol => "paracetamol",
            Dataset::SalicylicAcid => "salicylic_acid",
            Dataset::Toluene => "toluene",
            Dataset::Uracil => "uracil",
        }
    }

    pub fn archive_file_name(&self) -> &'static str {
        match self {
            Dataset::Aspirin => "aspirin_dft.npz",
            Dataset::Azobenzene => "azobenzene_dft.npz",
            Dataset::Benzene => "benzene_dft.npz",
            Dataset::Ethanol => "ethanol_dft.npz",
            Dataset::Malonaldehyde => "malonaldehyde_dft.npz",
            Dataset::Naphthalene => "naphthalene_dft.npz",
            Dataset::Paracetamol => "paracetamol_dft.npz",
            Dataset::SalicylicAcid => "salicylic_dft.npz",
            Dataset::Toluene => "toluene_dft.npz",
            Dataset::Uracil => "uracil_dft.npz",
        }
    }

    pub fn database_file_name(&self) -> String {
        format!("{}.db", self.name())
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dataset {
    type Err = MdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Dataset::ALL
            .into_iter()
            .find(|dataset| dataset.name() == normalized)
            .ok_or_else(|| MdError::UnknownDataset(value.to_string()))
    }
}
