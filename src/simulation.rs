//! Molecular dynamics driver.
//!
//! A [`Simulator`] owns a [`System`] and advances it with an [`Integrator`],
//! evaluating forces through a [`Calculator`] (usually a [`ModelCalculator`]
//! wrapping a trained [`PotentialModel`]) and coupling to a heat bath through a
//! [`Thermostat`]. Units throughout: Å, fs, amu, kcal/mol, K.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::MdError;
use crate::record::MolecularRecord;

/// kcal/mol/Å divided by amu, expressed in Å/fs².
pub const ACCELERATION_UNIT: f64 = 4.184e-4;
/// Boltzmann constant in kcal/mol/K.
pub const BOLTZMANN: f64 = 0.001_987_204_1;

const TRAJECTORY_FILE: &str = "trajectory.jsonl";
const CONFIG_FILE: &str = "config.json";

/// Standard atomic weights (amu) for Z = 1..=18.
const ATOMIC_MASSES: [f64; 18] = [
    1.008, 4.0026, 6.94, 9.0122, 10.81, 12.011, 14.007, 15.999, 18.998, 20.180, 22.990, 24.305,
    26.982, 28.085, 30.974, 32.06, 35.45, 39.948,
];

pub fn atomic_mass(atomic_number: u8) -> Option<f64> {
    ATOMIC_MASSES
        .get(usize::from(atomic_number).checked_sub(1)?)
        .copied()
}

/// A trained interatomic potential.
pub trait PotentialModel {
    fn energy_and_forces(
        &self,
        atomic_numbers: &[u8],
        positions: &[[f64; 3]],
    ) -> Result<Evaluation, MdError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub energy: f64,
    pub forces: Vec<[f64; 3]>,
}

pub trait Calculator {
    fn compute(&self, system: &System) -> Result<Evaluation, MdError>;
}

pub struct ModelCalculator<M> {
    model: M,
}

impl<M: PotentialModel> ModelCalculator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: PotentialModel> Calculator for ModelCalculator<M> {
    fn compute(&self, system: &System) -> Result<Evaluation, MdError> {
        let evaluation = self
            .model
            .energy_and_forces(&system.atomic_numbers, &system.positions)?;
        if evaluation.forces.len() != system.atom_count() {
            return Err(MdError::Simulation(format!(
                "model returned {} forces for {} atoms",
                evaluation.forces.len(),
                system.atom_count()
            )));
        }
        Ok(evaluation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub atomic_numbers: Vec<u8>,
    pub positions: Vec<[f64; 3]>,
    pub velocities: Vec<[f64; 3]>,
    pub masses: Vec<f64>,
}

impl System {
    /// Start from a stored structure at rest.
    pub fn from_record(record: &MolecularRecord) -> Result<Self, MdError> {
        let masses = record
            .atomic_numbers
            .iter()
            .map(|&z| {
                atomic_mass(z).ok_or_else(|| {
                    MdError::Simulation(format!("no atomic mass for atomic number {z}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            atomic_numbers: record.atomic_numbers.clone(),
            positions: record.positions.clone(),
            velocities: vec![[0.0; 3]; record.atom_count()],
            masses,
        })
    }

    pub fn with_velocities(mut self, velocities: Vec<[f64; 3]>) -> Result<Self, MdError> {
        if velocities.len() != self.atom_count() {
            return Err(MdError::Simulation(format!(
                "{} velocities for {} atoms",
                velocities.len(),
                self.atom_count()
            )));
        }
        self.velocities = velocities;
        Ok(self)
    }

    pub fn atom_count(&self) -> usize {
        self.atomic_numbers.len()
    }

    /// Kinetic energy in kcal/mol.
    pub fn kinetic_energy(&self) -> f64 {
        self.masses
            .iter()
            .zip(&self.velocities)
            .map(|(mass, v)| 0.5 * mass * (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]))
            .sum::<f64>()
            / ACCELERATION_UNIT
    }

    pub fn temperature(&self) -> f64 {
        let dof = 3.0 * self.atom_count() as f64;
        if dof == 0.0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (dof * BOLTZMANN)
    }

    fn kick(&mut self, forces: &[[f64; 3]], dt: f64) {
        for ((velocity, force), mass) in self.velocities.iter_mut().zip(forces).zip(&self.masses) {
            let scale = 0.5 * dt * ACCELERATION_UNIT / mass;
            for axis in 0..3 {
                velocity[axis] += scale * force[axis];
            }
        }
    }

    fn drift(&mut self, dt: f64) {
        for (position, velocity) in self.positions.iter_mut().zip(&self.velocities) {
            for axis in 0..3 {
                position[axis] += dt * velocity[axis];
            }
        }
    }
}

pub trait Integrator {
    fn time_step(&self) -> f64;

    /// Advance one step given the forces at the current positions; returns
    /// the evaluation at the new positions.
    fn step<C: Calculator>(
        &self,
        system: &mut System,
        calculator: &C,
        current: &Evaluation,
    ) -> Result<Evaluation, MdError>;
}

#[derive(Debug, Clone, Copy)]
pub struct VelocityVerlet {
    pub time_step_fs: f64,
}

impl Integrator for VelocityVerlet {
    fn time_step(&self) -> f64 {
        self.time_step_fs
    }

    fn step<C: Calculator>(
        &self,
        system: &mut System,
        calculator: &C,
        current: &Evaluation,
    ) -> Result<Evaluation, MdError> {
        system.kick(&current.forces, self.time_step_fs);
        system.drift(self.time_step_fs);
        let next = calculator.compute(system)?;
        system.kick(&next.forces, self.time_step_fs);
        Ok(next)
    }
}

pub trait Thermostat {
    fn apply(&mut self, system: &mut System, time_step: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoThermostat;

impl Thermostat for NoThermostat {
    fn apply(&mut self, _system: &mut System, _time_step: f64) {}
}

/// Velocity rescaling towards `target_kelvin` with relaxation time `time_constant_fs`.
#[derive(Debug, Clone, Copy)]
pub struct BerendsenThermostat {
    pub target_kelvin: f64,
    pub time_constant_fs: f64,
}

impl Thermostat for BerendsenThermostat {
    fn apply(&mut self, system: &mut System, time_step: f64) {
        let current = system.temperature();
        if current <= 0.0 {
            return;
        }
        let ratio = time_step / self.time_constant_fs;
        let lambda = (1.0 + ratio * (self.target_kelvin / current - 1.0))
            .max(0.0)
            .sqrt();
        for velocity in &mut system.velocities {
            for component in velocity.iter_mut() {
                *component *= lambda;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub step: usize,
    pub time_fs: f64,
    pub potential_energy: f64,
    pub kinetic_energy: f64,
    pub temperature: f64,
    pub positions: Vec<[f64; 3]>,
    pub velocities: Vec<[f64; 3]>,
}

impl Frame {
    pub fn total_energy(&self) -> f64 {
        self.potential_energy + self.kinetic_energy
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub frames: Vec<Frame>,
}

/// Output directory of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationDir {
    path: Utf8PathBuf,
}

impl SimulationDir {
    /// Create `path`; an existing directory is an error unless `overwrite`,
    /// in which case it is wiped first.
    pub fn prepare(path: impl Into<Utf8PathBuf>, overwrite: bool) -> Result<Self, MdError> {
        let path = path.into();
        if path.as_std_path().exists() {
            if !overwrite {
                return Err(MdError::SimulationDir(format!(
                    "{path} already exists (set overwrite?)"
                )));
            }
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| MdError::SimulationDir(format!("remove {path}: {err}")))?;
        }
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| MdError::SimulationDir(format!("create {path}: {err}")))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn trajectory_path(&self) -> Utf8PathBuf {
        self.path.join(TRAJECTORY_FILE)
    }

    pub fn save_config<T: Serialize>(&self, config: &T) -> Result<(), MdError> {
        let content = serde_json::to_vec_pretty(config)
            .map_err(|err| MdError::SimulationDir(err.to_string()))?;
        fs::write(self.path.join(CONFIG_FILE).as_std_path(), content)
            .map_err(|err| MdError::SimulationDir(err.to_string()))
    }
}

pub struct Simulator<C, I, T> {
    system: System,
    calculator: C,
    integrator: I,
    thermostat: T,
    directory: Option<SimulationDir>,
    log_interval: usize,
    step: usize,
}

impl<C: Calculator, I: Integrator, T: Thermostat> Simulator<C, I, T> {
    pub fn new(system: System, calculator: C, integrator: I, thermostat: T) -> Self {
        Self {
            system,
            calculator,
            integrator,
            thermostat,
            directory: None,
            log_interval: 1,
            step: 0,
        }
    }

    /// Stream frames to `trajectory.jsonl` inside `directory`.
    pub fn with_directory(mut self, directory: SimulationDir) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// Run `steps` integration steps. Frame 0 is the starting state; later
    /// frames are taken every `log_interval` steps.
    pub fn simulate(&mut self, steps: usize) -> Result<Trajectory, MdError> {
        let mut writer = match &self.directory {
            Some(directory) => {
                let path = directory.trajectory_path();
                let file = File::options()
                    .create(true)
                    .append(true)
                    .open(path.as_std_path())
                    .map_err(|err| MdError::SimulationDir(format!("open {path}: {err}")))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let mut trajectory = Trajectory::default();
        let mut evaluation = self.calculator.compute(&self.system)?;
        if self.step == 0 {
            self.record(&evaluation, &mut trajectory, writer.as_mut())?;
        }

        let dt = self.integrator.time_step();
        for _ in 0..steps {
            evaluation = self
                .integrator
                .step(&mut self.system, &self.calculator, &evaluation)?;
            self.thermostat.apply(&mut self.system, dt);
            self.step += 1;
            if self.step % self.log_interval == 0 {
                self.record(&evaluation, &mut trajectory, writer.as_mut())?;
            }
        }

        if let Some(writer) = writer.as_mut() {
            writer
                .flush()
                .map_err(|err| MdError::SimulationDir(err.to_string()))?;
        }
        tracing::info!(
            steps,
            frames = trajectory.frames.len(),
            temperature = self.system.temperature(),
            "simulation finished"
        );
        Ok(trajectory)
    }

    fn record(
        &self,
        evaluation: &Evaluation,
        trajectory: &mut Trajectory,
        writer: Option<&mut BufWriter<File>>,
    ) -> Result<(), MdError> {
        let frame = Frame {
            step: self.step,
            time_fs: self.step as f64 * self.integrator.time_step(),
            potential_energy: evaluation.energy,
            kinetic_energy: self.system.kinetic_energy(),
            temperature: self.system.temperature(),
            positions: self.system.positions.clone(),
            velocities: self.system.velocities.clone(),
        };
        if let Some(writer) = writer {
            serde_json::to_writer(&mut *writer, &frame)
                .map_err(|err| MdError::SimulationDir(err.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|err| MdError::SimulationDir(err.to_string()))?;
        }
        trajectory.frames.push(frame);
        Ok(())
    }
}
