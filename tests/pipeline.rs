mod common;

use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mdbench::database::{RecordSource, SledBackend, SledDatabase, StoreSettings};
use mdbench::domain::Dataset;
use mdbench::error::{FetchCause, MdError};
use mdbench::pipeline::{OutcomeStatus, Pipeline};
use mdbench::registry::Registry;

use common::{MockFetcher, Molecule, RecordingSink};

const BASE_URL: &str = "http://archive.test/npz";

const FIVE: [Dataset; 5] = [
    Dataset::Aspirin,
    Dataset::Benzene,
    Dataset::Ethanol,
    Dataset::Toluene,
    Dataset::Uracil,
];

struct Workspace {
    _temp: tempfile::TempDir,
    dbdir: Utf8PathBuf,
    scratch: Utf8PathBuf,
}

fn workspace() -> Workspace {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    Workspace {
        dbdir: root.join("db"),
        scratch: root.join("scratch"),
        _temp: temp,
    }
}

fn pipeline(
    workspace: &Workspace,
    datasets: &[Dataset],
    fetcher: MockFetcher,
) -> Pipeline<MockFetcher, SledBackend> {
    Pipeline::new(
        Registry::with_datasets(BASE_URL, datasets),
        fetcher,
        SledBackend,
        workspace.dbdir.clone(),
        StoreSettings::default(),
    )
    .with_scratch_root(workspace.scratch.clone())
}

fn water() -> Molecule {
    Molecule::new(&[1, 8], &[-10.0, -20.0, -30.0])
}

fn open_store(path: &Utf8PathBuf) -> SledDatabase {
    SledDatabase::open(path.as_std_path(), &StoreSettings::default()).unwrap()
}

#[test]
fn single_dataset_is_converted_in_order() {
    let ws = workspace();
    let fetcher = MockFetcher::default().with_archive("ethanol_dft.npz", water().npz());
    let pipeline = pipeline(&ws, &FIVE, fetcher);
    let sink = RecordingSink::default();

    let report = pipeline.run(Dataset::Ethanol, false, &sink).unwrap();
    assert!(report.success());
    assert!(!report.skipped);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].url, format!("{BASE_URL}/ethanol_dft.npz"));
    assert_eq!(
        report.outcomes[0].status,
        OutcomeStatus::Converted { records: 3 }
    );
    assert!(
        sink.events
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.starts_with("phase=Fetch"))
    );

    let path = pipeline.database_path(Dataset::Ethanol);
    assert_eq!(path, ws.dbdir.join("ethanol.db"));
    drop(pipeline);
    let store = open_store(&path);
    assert_eq!(store.len(), 3);
    for index in 0..3 {
        let record = store.read_at(index).unwrap();
        assert_eq!(record.atomic_numbers, vec![1, 8]);
        assert_eq!(record.energy(), Some(-10.0 * (index + 1) as f64));
        assert_eq!(record.positions[1], Molecule::coordinate(index, 1));
        let expected_force = Molecule::coordinate(index, 0).map(|value| -value);
        assert_eq!(record.forces().unwrap()[0], expected_force);
    }
}

#[test]
fn existing_store_skips_network() {
    let ws = workspace();
    let first = pipeline(
        &ws,
        &FIVE,
        MockFetcher::default().with_archive("uracil_dft.npz", water().npz()),
    );
    assert!(first.run(Dataset::Uracil, false, &RecordingSink::default()).unwrap().success());
    drop(first);

    let second = pipeline(&ws, &FIVE, MockFetcher::default());
    let report = second
        .run(Dataset::Uracil, false, &RecordingSink::default())
        .unwrap();
    assert!(report.skipped);
    assert!(report.success());
    assert!(report.outcomes.is_empty());
    drop(second);

    let store = open_store(&ws.dbdir.join("uracil.db"));
    assert_eq!(store.len(), 3);
}

#[test]
fn existing_store_is_not_fetched_again() {
    let ws = workspace();
    fs::create_dir_all(ws.dbdir.join("toluene.db")).unwrap();
    let fetcher = MockFetcher::default();
    let pipeline = pipeline(&ws, &FIVE, fetcher);
    let report = pipeline
        .run(Dataset::Toluene, true, &RecordingSink::default())
        .unwrap();
    assert!(report.skipped);
}

#[test]
fn failed_single_fetch_leaves_no_store() {
    let ws = workspace();
    let pipeline = pipeline(&ws, &FIVE, MockFetcher::default());

    let report = pipeline
        .run(Dataset::Aspirin, false, &RecordingSink::default())
        .unwrap();
    assert!(!report.success());
    assert_eq!(report.outcomes.len(), 1);
    assert_matches!(
        &report.outcomes[0].status,
        OutcomeStatus::FetchFailed { cause, .. } if cause == "status"
    );
    assert!(!ws.dbdir.join("aspirin.db").as_std_path().exists());
}

#[test]
fn unreachable_host_leaves_no_store() {
    let ws = workspace();
    let fetcher = MockFetcher::default().with_failure(
        "aspirin_dft.npz",
        FetchCause::Connect("connection refused".to_string()),
    );
    let pipeline = pipeline(&ws, &FIVE, fetcher);

    let report = pipeline
        .run(Dataset::Aspirin, false, &RecordingSink::default())
        .unwrap();
    assert!(!report.success());
    assert_matches!(
        &report.outcomes[0].status,
        OutcomeStatus::FetchFailed { cause, message }
            if cause == "connect" && message.contains("connection refused")
    );
    assert!(!ws.dbdir.join("aspirin.db").as_std_path().exists());
}

#[test]
fn undeclared_property_fails_without_leaving_a_store() {
    let ws = workspace();
    let settings = StoreSettings {
        properties: vec![
            "energy".to_string(),
            "forces".to_string(),
            "dipole".to_string(),
        ],
        ..StoreSettings::default()
    };
    let build = || {
        Pipeline::new(
            Registry::with_datasets(BASE_URL, &FIVE),
            MockFetcher::default().with_archive("ethanol_dft.npz", water().npz()),
            SledBackend,
            ws.dbdir.clone(),
            settings.clone(),
        )
        .with_scratch_root(ws.scratch.clone())
    };

    let first = build().run(Dataset::Ethanol, false, &RecordingSink::default());
    assert_matches!(first, Err(MdError::Database(message)) if message.contains("dipole"));
    assert!(!ws.dbdir.join("ethanol.db").as_std_path().exists());

    // A retry is attempted again rather than skipped.
    let second = build().run(Dataset::Ethanol, false, &RecordingSink::default());
    assert_matches!(second, Err(MdError::Database(_)));
    assert!(!ws.dbdir.join("ethanol.db").as_std_path().exists());
}

#[test]
fn malformed_archive_is_reported_without_records() {
    let ws = workspace();
    let broken = common::npz(&[("z", mdbench::npy::encode_u8(&[2], &[1, 8]))]);
    let fetcher = MockFetcher::default().with_archive("benzene_dft.npz", broken);
    let pipeline = pipeline(&ws, &FIVE, fetcher);

    let report = pipeline
        .run(Dataset::Benzene, false, &RecordingSink::default())
        .unwrap();
    assert_matches!(
        &report.outcomes[0].status,
        OutcomeStatus::Malformed { message } if message.contains("missing field 'R'")
    );
    assert!(!ws.dbdir.join("benzene.db").as_std_path().exists());
}

#[test]
fn all_mode_continues_past_failures() {
    let ws = workspace();
    let mut fetcher = MockFetcher::default();
    let mut expected = 0;
    for (offset, dataset) in FIVE.iter().enumerate() {
        if *dataset == Dataset::Benzene {
            continue;
        }
        let energies = (0..offset + 1).map(|i| i as f64).collect::<Vec<_>>();
        expected += energies.len();
        fetcher = fetcher.with_archive(
            dataset.archive_file_name(),
            Molecule::new(&[6, 1, 1], &energies).npz(),
        );
    }
    let pipeline = pipeline(&ws, &FIVE, fetcher);

    let report = pipeline
        .run(Dataset::Toluene, true, &RecordingSink::default())
        .unwrap();
    assert!(!report.success());
    assert_eq!(report.outcomes.len(), 5);
    let failed = report
        .outcomes
        .iter()
        .filter(|outcome| !outcome.is_converted())
        .map(|outcome| outcome.dataset)
        .collect::<Vec<_>>();
    assert_eq!(failed, vec![Dataset::Benzene]);
    assert_eq!(report.converted_records(), expected);
    drop(pipeline);

    // Every dataset lands in the target's store.
    let store = open_store(&ws.dbdir.join("toluene.db"));
    assert_eq!(store.len(), expected);
    for other in [Dataset::Aspirin, Dataset::Ethanol, Dataset::Uracil] {
        assert!(!ws.dbdir.join(other.database_file_name()).as_std_path().exists());
    }
}

#[test]
fn scratch_directories_are_removed() {
    let ws = workspace();
    let fetcher = MockFetcher::default().with_archive("aspirin_dft.npz", water().npz());
    let pipeline = pipeline(&ws, &FIVE, fetcher);

    pipeline
        .run(Dataset::Aspirin, true, &RecordingSink::default())
        .unwrap();

    let leftovers = fs::read_dir(ws.scratch.as_std_path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn dataset_outside_registry_is_rejected() {
    let ws = workspace();
    let pipeline = pipeline(&ws, &[Dataset::Aspirin], MockFetcher::default());
    let result = pipeline.run(Dataset::Naphthalene, false, &RecordingSink::default());
    assert_matches!(result, Err(MdError::UnknownDataset(name)) if name == "naphthalene");
    assert!(!ws.dbdir.as_std_path().exists());
}
