// Drive the orchestrator against a scripted process runner and check the
// exact sequence of tool invocations and the files left behind.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pgkeeper_backup::{
    BackupError, BackupOrchestrator, Invocation, PostgresOrchestrator, ProcessOutput,
    ProcessRunner, Result,
};
use pgkeeper_core::{Datasource, DumpFormat, ScheduleSpec};

trait ArgLookup {
    fn flag_value(&self, flag: &str) -> Option<&str>;
}

impl ArgLookup for Invocation {
    /// Argument following `flag`, e.g. the `-f` target.
    fn flag_value(&self, flag: &str) -> Option<&str> {
        let mut args = self.args.iter();
        args.position(|a| a == flag)?;
        args.next().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Probe,
    Clear,
    Dump,
    Restore,
}

fn step_of(inv: &Invocation) -> Step {
    match inv.program.as_str() {
        "pg_dump" => Step::Dump,
        "pg_restore" => Step::Restore,
        "psql" if inv.flag_value("-f").is_some() => Step::Restore,
        "psql" if inv.flag_value("-c") == Some("SELECT 1") => Step::Probe,
        "psql" if inv.flag_value("-c").is_some_and(|c| c.contains("DROP SCHEMA")) => Step::Clear,
        other => panic!("unexpected invocation of {other}: {inv:?}"),
    }
}

type Script = Box<dyn Fn(Step, &Invocation) -> Result<ProcessOutput> + Send + Sync>;

/// Records every invocation and answers from a script.
struct FakeRunner {
    calls: Mutex<Vec<(Step, Invocation)>>,
    script: Script,
}

impl FakeRunner {
    fn new(script: impl Fn(Step, &Invocation) -> Result<ProcessOutput> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    /// Everything succeeds; pg_dump writes a small dump to its `-f` target.
    fn happy() -> Arc<Self> {
        Self::new(|step, inv| {
            if step == Step::Dump {
                write_dump_target(inv);
            }
            Ok(ok(""))
        })
    }

    fn steps(&self) -> Vec<Step> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    fn call(&self, step: Step) -> Invocation {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, inv)| inv.clone())
            .unwrap_or_else(|| panic!("no {step:?} call recorded"))
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, inv: &Invocation) -> Result<ProcessOutput> {
        let step = step_of(inv);
        self.calls.lock().unwrap().push((step, inv.clone()));
        (self.script)(step, inv)
    }
}

const DUMP_BODY: &str = "-- PostgreSQL database dump\nCREATE TABLE t (id int);\n";

fn write_dump_target(inv: &Invocation) {
    let target = inv.flag_value("-f").expect("pg_dump without -f");
    fs::write(target, DUMP_BODY).unwrap();
}

fn ok(output: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        output: output.to_string(),
    }
}

fn exit(code: i32, output: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        output: output.to_string(),
    }
}

fn datasource() -> Datasource {
    Datasource::new(
        "db.internal",
        5433,
        "app",
        "backup_user",
        "s3cret",
        "require",
        ScheduleSpec::default(),
    )
}

fn orchestrator(dir: &Path, runner: Arc<FakeRunner>) -> PostgresOrchestrator {
    PostgresOrchestrator::new(runner, dir, Duration::from_secs(900)).unwrap()
}

fn gzip_file(path: &Path, body: &str) {
    let mut enc = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(body.as_bytes()).unwrap();
    enc.finish().unwrap();
}

fn gunzip_to_string(path: &Path) -> String {
    let mut s = String::new();
    GzDecoder::new(fs::File::open(path).unwrap())
        .read_to_string(&mut s)
        .unwrap();
    s
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut v: Vec<PathBuf> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    v.sort();
    v
}

// ---------------------------------------------------------------------------
// backup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_backup_ends_up_gzipped_in_backup_dir() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    let artifact = orch.backup(&datasource(), "out", DumpFormat::Plain).await.unwrap();

    assert_eq!(artifact.path, dir.path().join("out.sql.gz"));
    assert!(!dir.path().join("out.sql").exists());
    assert_eq!(gunzip_to_string(&artifact.path), DUMP_BODY);
    assert_eq!(runner.steps(), vec![Step::Probe, Step::Dump]);

    let dump = runner.call(Step::Dump);
    assert!(dump.args.contains(&"--no-owner".to_string()));
    assert_eq!(dump.flag_value("-F"), Some("p"));
    assert_eq!(dump.flag_value("-h"), Some("db.internal"));
    assert_eq!(dump.flag_value("-p"), Some("5433"));
    assert_eq!(dump.flag_value("-U"), Some("backup_user"));
    assert_eq!(dump.flag_value("-d"), Some("app"));
    assert_eq!(
        dump.flag_value("-f"),
        Some(dir.path().join("out.sql").to_str().unwrap())
    );
    assert!(dump.env.contains(&("PGPASSWORD".to_string(), "s3cret".to_string())));
    assert!(dump.env.contains(&("PGSSLMODE".to_string(), "require".to_string())));
    assert!(!dump.args.iter().any(|a| a.contains("s3cret")));
    assert_eq!(dump.timeout, Duration::from_secs(900));
}

#[tokio::test]
async fn custom_backup_uses_archive_extension() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    let artifact = orch.backup(&datasource(), "nightly", DumpFormat::Custom).await.unwrap();

    assert_eq!(artifact.path, dir.path().join("nightly.backup.gz"));
    assert_eq!(runner.call(Step::Dump).flag_value("-F"), Some("c"));
    assert_eq!(entries(dir.path()), vec![dir.path().join("nightly.backup.gz")]);
}

#[tokio::test]
async fn destination_with_directory_is_used_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), FakeRunner::happy());

    let dest = elsewhere.path().join("sub").join("adhoc");
    let artifact = orch
        .backup(&datasource(), dest.to_str().unwrap(), DumpFormat::Plain)
        .await
        .unwrap();

    assert_eq!(artifact.path, elsewhere.path().join("sub").join("adhoc.sql.gz"));
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn unreachable_server_fails_before_dumping() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new(|step, _| match step {
        Step::Probe => Ok(exit(2, "psql: error: connection to server failed")),
        _ => Ok(ok("")),
    });
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch.backup(&datasource(), "out", DumpFormat::Plain).await.unwrap_err();

    match err {
        BackupError::Connectivity { output } => assert!(output.contains("connection to server failed")),
        other => panic!("expected Connectivity, got {other:?}"),
    }
    assert_eq!(runner.steps(), vec![Step::Probe]);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn dump_failure_carries_tool_output() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new(|step, _| match step {
        Step::Dump => Ok(exit(1, "pg_dump: error: permission denied for table t")),
        _ => Ok(ok("")),
    });
    let orch = orchestrator(dir.path(), runner);

    let err = orch.backup(&datasource(), "out", DumpFormat::Plain).await.unwrap_err();

    match err {
        BackupError::ProcessExecution { program, reason, output } => {
            assert_eq!(program, "pg_dump");
            assert_eq!(reason, "exit code 1");
            assert!(output.contains("permission denied"));
        }
        other => panic!("expected ProcessExecution, got {other:?}"),
    }
    assert!(!dir.path().join("out.sql.gz").exists());
}

#[tokio::test]
async fn compression_failure_keeps_dump_output() {
    let dir = tempfile::tempdir().unwrap();
    // pg_dump "succeeds" but writes nothing, so there is nothing to gzip.
    let runner = FakeRunner::new(|_, _| Ok(ok("pg_dump: dumping contents of table t")));
    let orch = orchestrator(dir.path(), runner);

    let err = orch.backup(&datasource(), "out", DumpFormat::Plain).await.unwrap_err();

    match &err {
        BackupError::Compression { path, output, .. } => {
            assert_eq!(path, &dir.path().join("out.sql"));
            assert!(output.contains("dumping contents"));
        }
        other => panic!("expected Compression, got {other:?}"),
    }
    assert!(err.to_string().starts_with("backup succeeded but compression failed"));
}

#[test]
fn backup_dir_is_created() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("a").join("b");
    let orch = PostgresOrchestrator::new(FakeRunner::happy(), &dir, Duration::from_secs(1)).unwrap();
    assert!(dir.is_dir());
    assert_eq!(orch.backup_dir(), dir.as_path());
}

// ---------------------------------------------------------------------------
// restore
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_extension_is_rejected_without_clearing() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.tar");
    fs::write(&file, "x").unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch.restore(&datasource(), &file).await.unwrap_err();

    assert!(matches!(err, BackupError::UnsupportedFormat { .. }));
    assert!(runner.steps().is_empty());
}

#[tokio::test]
async fn missing_file_is_rejected_without_clearing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch
        .restore(&datasource(), &dir.path().join("gone.sql"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Filesystem { .. }));
    assert!(runner.steps().is_empty());
}

#[tokio::test]
async fn plain_restore_clears_then_runs_psql() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.sql");
    fs::write(&file, DUMP_BODY).unwrap();
    let runner = FakeRunner::new(|_, _| Ok(ok("CREATE TABLE")));
    let orch = orchestrator(dir.path(), runner.clone());

    let outcome = orch.restore(&datasource(), &file).await.unwrap();

    assert_eq!(runner.steps(), vec![Step::Clear, Step::Restore]);
    assert!(outcome.warning.is_none());
    assert_eq!(outcome.output, "CREATE TABLE");

    let restore = runner.call(Step::Restore);
    assert_eq!(restore.program, "psql");
    assert_eq!(restore.flag_value("-f"), file.to_str());
    assert_eq!(restore.flag_value("-d"), Some("app"));
}

#[tokio::test]
async fn custom_restore_uses_pg_restore() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.backup");
    fs::write(&file, "PGDMP").unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    orch.restore(&datasource(), &file).await.unwrap();

    let restore = runner.call(Step::Restore);
    assert_eq!(restore.program, "pg_restore");
    assert!(restore.args.contains(&"--no-owner".to_string()));
    assert_eq!(restore.args.last().map(String::as_str), file.to_str());
}

#[tokio::test]
async fn compressed_restore_feeds_decompressed_copy_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.sql.gz");
    gzip_file(&file, DUMP_BODY);

    let seen = Arc::new(Mutex::new(None::<(PathBuf, String)>));
    let seen_in = seen.clone();
    let runner = FakeRunner::new(move |step, inv| {
        if step == Step::Restore {
            let input = PathBuf::from(inv.flag_value("-f").unwrap());
            let body = fs::read_to_string(&input).unwrap();
            *seen_in.lock().unwrap() = Some((input, body));
        }
        Ok(ok(""))
    });
    let orch = orchestrator(dir.path(), runner.clone());

    orch.restore(&datasource(), &file).await.unwrap();

    let (input, body) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body, DUMP_BODY);
    assert_ne!(input, file);
    assert!(!input.exists());
    assert_eq!(entries(dir.path()), vec![file]);
    assert_eq!(runner.steps(), vec![Step::Clear, Step::Restore]);
}

#[tokio::test]
async fn corrupt_archive_fails_after_clear_and_leaves_no_transient_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.sql.gz");
    fs::write(&file, "definitely not gzip").unwrap();
    let runner = FakeRunner::happy();
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch.restore(&datasource(), &file).await.unwrap_err();

    match err {
        BackupError::Decompression { path, .. } => assert_eq!(path, file),
        other => panic!("expected Decompression, got {other:?}"),
    }
    assert_eq!(runner.steps(), vec![Step::Clear]);
    assert_eq!(entries(dir.path()), vec![file]);
}

#[tokio::test]
async fn compressed_restore_does_not_touch_existing_plain_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let gz = dir.path().join("app.sql.gz");
    let plain = dir.path().join("app.sql");
    gzip_file(&gz, DUMP_BODY);
    fs::write(&plain, "-- keep me\n").unwrap();
    let orch = orchestrator(dir.path(), FakeRunner::happy());

    orch.restore(&datasource(), &gz).await.unwrap();

    assert_eq!(fs::read_to_string(&plain).unwrap(), "-- keep me\n");
    assert_eq!(entries(dir.path()), vec![plain, gz]);
}

#[tokio::test]
async fn error_in_output_is_a_hard_failure_even_on_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.backup.gz");
    gzip_file(&file, "PGDMP");
    let runner = FakeRunner::new(|step, _| match step {
        Step::Restore => Ok(ok("pg_restore: ERROR:  relation \"t\" already exists")),
        _ => Ok(ok("")),
    });
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch.restore(&datasource(), &file).await.unwrap_err();

    match err {
        BackupError::ProcessExecution { program, output, .. } => {
            assert_eq!(program, "pg_restore");
            assert!(output.contains("already exists"));
        }
        other => panic!("expected ProcessExecution, got {other:?}"),
    }
    // Cleared first, and the transient copy is gone even though restore failed.
    assert_eq!(runner.steps(), vec![Step::Clear, Step::Restore]);
    assert_eq!(entries(dir.path()), vec![file]);
}

#[tokio::test]
async fn non_zero_exit_without_error_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.backup");
    fs::write(&file, "PGDMP").unwrap();
    let runner = FakeRunner::new(|step, _| match step {
        Step::Restore => Ok(exit(1, "pg_restore: warning: errors ignored on restore: 1")),
        _ => Ok(ok("")),
    });
    let orch = orchestrator(dir.path(), runner);

    let outcome = orch.restore(&datasource(), &file).await.unwrap();

    assert_eq!(outcome.warning.as_deref(), Some("exit code 1"));
    assert!(outcome.output.contains("errors ignored"));
}

#[tokio::test]
async fn failed_clear_stops_restore() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("app.sql");
    fs::write(&file, DUMP_BODY).unwrap();
    let runner = FakeRunner::new(|step, _| match step {
        Step::Clear => Ok(exit(3, "ERROR:  out of shared memory")),
        _ => Ok(ok("")),
    });
    let orch = orchestrator(dir.path(), runner.clone());

    let err = orch.restore(&datasource(), &file).await.unwrap_err();

    assert!(matches!(err, BackupError::ProcessExecution { .. }));
    assert_eq!(runner.steps(), vec![Step::Clear]);
}

#[tokio::test]
async fn create_and_drop_database_go_through_maintenance_db() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_in = calls.clone();
    let runner = FakeRunner::new(move |_, inv| {
        calls_in.lock().unwrap().push(inv.flag_value("-c").unwrap_or_default().to_string());
        Ok(ok(""))
    });
    // step_of does not know CREATE/DROP DATABASE; bypass it.
    struct Passthrough(Arc<FakeRunner>);
    #[async_trait]
    impl ProcessRunner for Passthrough {
        async fn run(&self, inv: &Invocation) -> Result<ProcessOutput> {
            assert_eq!(inv.flag_value("-d"), Some("postgres"));
            (self.0.script)(Step::Probe, inv)
        }
    }
    let orch = PostgresOrchestrator::new(
        Arc::new(Passthrough(runner)),
        dir.path(),
        Duration::from_secs(1),
    )
    .unwrap();

    orch.create_database(&datasource()).await.unwrap();
    orch.drop_database(&datasource()).await.unwrap();

    let sql = calls.lock().unwrap().clone();
    assert_eq!(sql, vec!["CREATE DATABASE \"app\";", "DROP DATABASE \"app\";"]);
}
