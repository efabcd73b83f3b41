use std::sync::{Arc, Mutex};

use billing_partition::artifact::{ArtifactFormat, ArtifactRef, ArtifactStore, DirectoryArtifactStore};
use billing_partition::config::EngineConfig;
use billing_partition::execution::{ExecutionOptions, RunEvent, RunObserver};
use billing_partition::ingestion::{ingest_bytes, IngestionOptions, TableSource};
use billing_partition::jobs::{milestones, JobRegistry, JobStage};
use billing_partition::pipeline::{Pipeline, RunReport};
use billing_partition::resolve::Resolution;
use billing_partition::types::{Table, Value};
use billing_partition::{ArtifactError, EngineError, ErrorClass};
use tempfile::TempDir;

fn sources() -> (TableSource, TableSource) {
    (
        TableSource::from_path("tests/fixtures/crystal.csv").unwrap(),
        TableSource::from_path("tests/fixtures/query.csv").unwrap(),
    )
}

fn csv_config() -> EngineConfig {
    EngineConfig {
        artifact_format: ArtifactFormat::Csv,
        execution: ExecutionOptions {
            num_threads: Some(2),
            max_in_flight_writes: 2,
        },
        ..EngineConfig::default()
    }
}

fn run(dir: &TempDir) -> (RunReport, Arc<DirectoryArtifactStore>) {
    let store = Arc::new(DirectoryArtifactStore::new(dir.path().join("descargas"), ArtifactFormat::Csv).unwrap());
    let pipeline = Pipeline::new(csv_config(), store.clone()).unwrap();
    let (crystal, query) = sources();
    let job = JobRegistry::new().start();
    let out = pipeline.run_sources(&job, &crystal, &query).unwrap();
    let report = out.report().expect("run completed").clone();
    (report, store)
}

#[test]
fn fixture_run_produces_expected_report() {
    let dir = TempDir::new().unwrap();
    let (report, _) = run(&dir);

    assert_eq!(report.crystal.mapping.column("professional"), Some("nombre profesional"));
    assert_eq!(report.crystal.mapping.column("service"), Some("servicio realizado"));
    assert_eq!(report.crystal.mapping.column("user"), Some("usuario validador"));
    assert!(report
        .crystal
        .mapping
        .roles()
        .iter()
        .all(|r| matches!(r.resolution, Resolution::Synonym(_))));

    assert_eq!(report.totals.crystal_services, 7);
    assert_eq!(report.totals.query_services, 4);
    assert_eq!(report.totals.professionals, 2);
    assert_eq!(report.totals.validators, 3);
    assert_eq!(report.totals.crystal_users, Some(3));
    assert_eq!(report.totals.crystal_excluded_rows, 2);
    assert_eq!(report.totals.query_excluded_rows, 0);

    let cats = &report.crystal.summary.categories;
    assert_eq!(cats.get("ecografia"), 3);
    assert_eq!(cats.get("rx"), 1);
    assert_eq!(cats.get("mamografia"), 1);
    assert_eq!(cats.get("cervicometria"), 1);
    assert_eq!(cats.get("otros"), 1);

    assert_eq!(report.professionals, vec!["Ana Pérez", "Luis Soto"]);
    assert_eq!(report.crystal_users, vec!["jgomez", "mrojas", "pvera"]);
    assert_eq!(report.query_users, vec!["JGOMEZ", "cfuentes", "mrojas"]);

    let ana = report.crystal_partition("ANA PÉREZ").unwrap();
    assert_eq!(ana.rows, 3);
    assert_eq!(ana.distinct, Some(2));
    assert_eq!(ana.categories.get("cervicometria"), 1);
    let luis = report.crystal_partition("luis soto").unwrap();
    assert_eq!(luis.distinct, Some(1));

    let validation = report.validation.as_ref().unwrap();
    assert_eq!(validation.flag_column, "en_crystal");
    assert_eq!((validation.rows.members, validation.rows.non_members), (3, 1));
    assert_eq!((validation.users.members, validation.users.non_members), (2, 1));
}

#[test]
fn artifacts_are_single_use_files() {
    let dir = TempDir::new().unwrap();
    let (report, store) = run(&dir);

    let names: Vec<String> = report.artifacts().map(|a| a.name.clone()).collect();
    assert_eq!(names.len(), 2 + 3 + 1);
    for name in &names {
        assert!(store.root().join(name).exists(), "{name}");
        assert!(name.ends_with(".csv"));
    }

    let validation = &report.validation.as_ref().unwrap().artifact;
    let bytes = store.get(&validation.name).unwrap();
    assert_eq!(bytes.len() as u64, validation.bytes);
    let table = ingest_bytes(&TableSource::new(validation.name.clone(), bytes), &IngestionOptions::default()).unwrap();
    assert_eq!(table.columns, vec!["usuario", "servicio", "fecha", "en_crystal"]);
    assert_eq!(table.row_count(), 4);

    assert!(matches!(store.get(&validation.name), Err(ArtifactError::NotFound { .. })));
    assert!(!store.root().join(&validation.name).exists());
}

#[test]
fn report_serializes_to_json() {
    let dir = TempDir::new().unwrap();
    let (report, _) = run(&dir);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["totals"]["professionals"], 2);
    assert_eq!(json["crystal"]["categories"]["ecografia"], 3);
    assert_eq!(json["crystal"]["partitions"][0]["label"], "Ana Pérez");
    assert_eq!(json["validation"]["users"]["non_members"], 1);
    assert!(json["token"].as_str().is_some());
}

#[test]
fn missing_service_column_fails_before_any_artifact() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DirectoryArtifactStore::new(dir.path(), ArtifactFormat::Csv).unwrap());
    let pipeline = Pipeline::new(csv_config(), store).unwrap();
    let registry = JobRegistry::new();
    let job = registry.start();

    let (crystal, _) = sources();
    let query = TableSource::new("query.csv", "usuario\njgomez\n");
    let err = pipeline.run_sources(&job, &crystal, &query).unwrap_err();
    assert!(matches!(err, EngineError::MissingRole { ref role, .. } if role == "service"));
    assert_eq!(err.status_code(), 400);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(registry.is_empty());
}

#[test]
fn unsupported_and_empty_uploads_are_input_errors() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::with_directory_store(csv_config(), dir.path()).unwrap();
    let (crystal, query) = sources();

    let job = JobRegistry::new().start();
    let pdf = TableSource::new("crystal.pdf", "%PDF-1.4");
    let err = pipeline.run_sources(&job, &pdf, &query).unwrap_err();
    assert!(matches!(err, EngineError::Ingestion(_)));
    assert_eq!(err.status_code(), 400);

    let job = JobRegistry::new().start();
    let empty = TableSource::new("query.csv", Vec::new());
    let err = pipeline.run_sources(&job, &crystal, &empty).unwrap_err();
    assert!(matches!(err, EngineError::Ingestion(_)));
}

#[test]
fn missing_user_column_skips_cross_validation() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::with_directory_store(csv_config(), dir.path()).unwrap();
    let crystal = TableSource::new(
        "crystal.csv",
        "profesional,servicio\nAna,Ecografia\nLuis,RX\n",
    );
    let (_, query) = sources();
    let job = JobRegistry::new().start();
    let out = pipeline.run_sources(&job, &crystal, &query).unwrap();
    let report = out.report().unwrap();
    assert!(report.validation.is_none());
    assert_eq!(report.totals.crystal_users, None);
    assert!(report.crystal_users.is_empty());
    assert_eq!(report.artifacts().count(), 2 + 3);
}

#[test]
fn reuploaded_validation_file_gets_fresh_flags() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DirectoryArtifactStore::new(dir.path(), ArtifactFormat::Csv).unwrap());
    let pipeline = Pipeline::new(csv_config(), store.clone()).unwrap();
    let (crystal, _) = sources();
    let query = TableSource::new(
        "validacion_query_usuarios.csv",
        "usuario,servicio,en_crystal\njgomez,RX,false\nu9,RX,true\n",
    );
    let job = JobRegistry::new().start();
    let out = pipeline.run_sources(&job, &crystal, &query).unwrap();
    let v = out.report().unwrap().validation.clone().unwrap();
    assert_eq!(v.rows.members, 1);

    let bytes = store.get(&v.artifact.name).unwrap();
    let table = ingest_bytes(&TableSource::new(v.artifact.name.clone(), bytes), &IngestionOptions::default()).unwrap();
    assert_eq!(table.columns, vec!["usuario", "servicio", "en_crystal"]);
    let flag = table.index_of(&v.flag_column).unwrap();
    assert_eq!(table.rows[0][flag], Value::Utf8("true".to_string()));
    assert_eq!(table.rows[1][flag], Value::Utf8("false".to_string()));
}

/// Directory store whose writes fail once an artifact name starts with `reject_prefix`.
struct RejectingStore {
    inner: DirectoryArtifactStore,
    reject_prefix: &'static str,
}

impl ArtifactStore for RejectingStore {
    fn format(&self) -> ArtifactFormat {
        self.inner.format()
    }

    fn put(&self, name: &str, table: &Table) -> Result<ArtifactRef, ArtifactError> {
        if name.starts_with(self.reject_prefix) {
            return Err(ArtifactError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(name, table)
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        self.inner.get(reference)
    }

    fn delete(&self, reference: &str) -> Result<(), ArtifactError> {
        self.inner.delete(reference)
    }
}

/// Records every event of a run.
#[derive(Default)]
struct EventLog(Mutex<Vec<RunEvent>>);

impl EventLog {
    fn events(&self) -> Vec<RunEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl RunObserver for EventLog {
    fn on_event(&self, event: &RunEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn failing_run(reject_prefix: &'static str) -> (TempDir, EngineError, Vec<RunEvent>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RejectingStore {
        inner: DirectoryArtifactStore::new(dir.path(), ArtifactFormat::Csv).unwrap(),
        reject_prefix,
    });
    let log = Arc::new(EventLog::default());
    let pipeline = Pipeline::new(csv_config(), store).unwrap().with_observer(log.clone());
    let registry = JobRegistry::new();
    let job = registry.start();
    let (crystal, query) = sources();
    let err = pipeline.run_sources(&job, &crystal, &query).unwrap_err();
    assert!(registry.is_empty());
    (dir, err, log.events())
}

#[test]
fn failed_query_partition_discards_crystal_artifacts() {
    let (dir, err, events) = failing_run("query_");
    assert_eq!(err.class(), ErrorClass::Resource);
    assert_eq!(err.status_code(), 500);

    let crystal_written = events
        .iter()
        .filter(|e| matches!(e, RunEvent::PartitionWritten { table, .. } if table == "crystal"))
        .count();
    assert_eq!(crystal_written, 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::StageChanged { stage: JobStage::Failed, progress } if *progress == milestones::PARTITIONING_SECONDARY
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::Failed { critical: true, .. })));
}

#[test]
fn failed_validation_artifact_discards_every_partition() {
    let (dir, err, events) = failing_run("validacion_query");
    assert!(matches!(err, EngineError::Artifact(ArtifactError::Io(_))));

    let written = events
        .iter()
        .filter(|e| matches!(e, RunEvent::PartitionWritten { .. }))
        .count();
    assert_eq!(written, 2 + 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(matches!(events.last(), Some(RunEvent::RunFinished { .. })));
}

#[test]
fn missing_user_column_emits_warnings() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(EventLog::default());
    let pipeline = Pipeline::with_directory_store(csv_config(), dir.path())
        .unwrap()
        .with_observer(log.clone());
    let crystal = TableSource::new("crystal.csv", "profesional,servicio\nAna,Ecografia\n");
    let (_, query) = sources();
    let job = JobRegistry::new().start();
    pipeline.run_sources(&job, &crystal, &query).unwrap();

    let events = log.events();
    let unresolved = events
        .iter()
        .find(|e| matches!(e, RunEvent::RoleUnresolved { .. }))
        .unwrap();
    match unresolved {
        RunEvent::RoleUnresolved { table, role, required } => {
            assert_eq!(table, "crystal");
            assert_eq!(role, "user");
            assert!(!required);
        }
        _ => unreachable!(),
    }
    let skipped = events
        .iter()
        .find(|e| matches!(e, RunEvent::CrossValidationSkipped { .. }))
        .unwrap();
    assert!(skipped.to_string().contains("user"));
    assert!(!events.iter().any(|e| matches!(e, RunEvent::CrossValidated { .. })));
}
