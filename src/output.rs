use std::collections::BTreeSet;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;

use crate::database::{AtomisticDatabase, RecordSource};
use crate::dataset::Md17;
use crate::environment::EnvironmentPolicy;
use crate::error::MdError;
use crate::pipeline::{OutcomeStatus, ProgressEvent, ProgressSink, RunReport};
use crate::record::MolecularRecord;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub base_url: String,
    pub datasets: Vec<ListItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListItem {
    pub name: String,
    pub url: String,
    pub database: String,
    pub converted: bool,
}

impl ListResult {
    pub fn new(registry: &Registry, dbdir: &Utf8Path) -> Self {
        let datasets = registry
            .entries()
            .map(|entry| {
                let database = dbdir.join(entry.dataset.database_file_name());
                ListItem {
                    name: entry.dataset.name().to_string(),
                    url: entry.url,
                    converted: database.as_std_path().exists(),
                    database: database.to_string(),
                }
            })
            .collect();
        Self {
            base_url: registry.base_url().to_string(),
            datasets,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub dataset: String,
    pub database: String,
    pub records: usize,
    pub properties: Vec<String>,
    pub environment: EnvironmentPolicy,
    pub elements: BTreeSet<u8>,
    pub created_at: String,
    pub tool: String,
}

impl InfoResult {
    pub fn new(dataset: &Md17) -> Self {
        let metadata = dataset.database().metadata();
        Self {
            dataset: dataset.dataset().name().to_string(),
            database: dataset.path().to_string(),
            records: dataset.len(),
            properties: metadata.settings.properties,
            environment: metadata.settings.environment,
            elements: metadata.elements,
            created_at: metadata.created_at,
            tool: metadata.tool,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsetResult {
    pub dataset: String,
    pub indices: Vec<usize>,
    pub records: Vec<MolecularRecord>,
}

impl SubsetResult {
    pub fn collect<S: RecordSource>(
        dataset: &str,
        indices: &[usize],
        view: &S,
    ) -> Result<Self, MdError> {
        let records = (0..view.len())
            .map(|index| view.read_at(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dataset: dataset.to_string(),
            indices: indices.to_vec(),
            records,
        })
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_subset(result: &SubsetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable summaries on stdout, progress on stderr.
pub struct TextOutput;

impl TextOutput {
    pub fn print_list(result: &ListResult) {
        println!("registry: {}", result.base_url);
        for item in &result.datasets {
            let mark = if item.converted { "*" } else { " " };
            println!("{mark} {:<16} {}", item.name, item.url);
        }
    }

    pub fn print_info(result: &InfoResult) {
        println!("dataset:     {}", result.dataset);
        println!("database:    {}", result.database);
        println!("records:     {}", result.records);
        println!("properties:  {}", result.properties.join(", "));
        println!("environment: {:?}", result.environment);
        let elements = result
            .elements
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("elements:    {elements}");
        println!("created:     {} ({})", result.created_at, result.tool);
    }

    pub fn print_fetch(report: &RunReport) {
        if report.skipped {
            println!("{} already present", report.database);
            return;
        }
        for outcome in &report.outcomes {
            match &outcome.status {
                OutcomeStatus::Converted { records } => {
                    println!("ok      {:<16} {records} records", outcome.dataset.name());
                }
                OutcomeStatus::FetchFailed { cause, message } => {
                    println!("failed  {:<16} {cause}: {message}", outcome.dataset.name());
                }
                OutcomeStatus::Malformed { message } => {
                    println!("failed  {:<16} {message}", outcome.dataset.name());
                }
            }
            if let Some(warning) = &outcome.cleanup_warning {
                println!("        warning: {warning}");
            }
        }
        println!(
            "{}: {} records written",
            report.database,
            report.converted_records()
        );
    }

    pub fn print_subset(result: &SubsetResult) {
        for (index, record) in result.indices.iter().zip(&result.records) {
            let energy = record
                .energy()
                .map(|value| format!("{value:.6}"))
                .unwrap_or_else(|| "-".to_string());
            println!("{index:>8}  atoms={}  energy={energy}", record.atom_count());
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
