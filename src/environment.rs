use serde::{Deserialize, Serialize};

/// How neighbours are assigned when a structure is read back for training.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvironmentPolicy {
    /// Every other atom in the molecule is a neighbour.
    #[default]
    Simple,
    /// Atoms closer than `radius` (Å) are neighbours.
    Cutoff { radius: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub neighbors: Vec<Vec<usize>>,
    /// Per atom, neighbour pairs `(j, k)` with `j < k`.
    pub triples: Option<Vec<Vec<(usize, usize)>>>,
}

impl EnvironmentPolicy {
    pub fn neighbors(&self, positions: &[[f64; 3]]) -> Vec<Vec<usize>> {
        let count = positions.len();
        match self {
            EnvironmentPolicy::Simple => (0..count)
                .map(|i| (0..count).filter(|&j| j != i).collect())
                .collect(),
            EnvironmentPolicy::Cutoff { radius } => {
                let limit = radius * radius;
                (0..count)
                    .map(|i| {
                        (0..count)
                            .filter(|&j| j != i && squared_distance(&positions[i], &positions[j]) < limit)
                            .collect()
                    })
                    .collect()
            }
        }
    }

    pub fn environment(&self, positions: &[[f64; 3]], collect_triples: bool) -> Environment {
        let neighbors = self.neighbors(positions);
        let triples = collect_triples.then(|| neighbors.iter().map(|list| pairs(list)).collect());
        Environment { neighbors, triples }
    }
}

fn pairs(neighbors: &[usize]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for (offset, &j) in neighbors.iter().enumerate() {
        for &k in &neighbors[offset + 1..] {
            out.push((j, k));
        }
    }
    out
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|axis| (a[axis] - b[axis]).powi(2)).sum()
}
