//! Subcommand handlers. Results go to stdout; diagnostics go through tracing.

use std::time::Duration;

use anyhow::{bail, Context};
use pgkeeper_core::{BackupRecord, CredentialCodec, Datasource, ScheduleSpec};
use pgkeeper_scheduler::{schedule, TaskId, TaskInfo, TaskKind, TaskRegistry, TaskStatus};
use pgkeeper_store::{BackupRecordStore, DatasourceCatalog};
use tracing::info;

use crate::app::{App, DatasourceChanges};
use crate::cli::{AddDatasource, BackupCommand, DatasourceCommand, UpdateDatasource};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn keygen() {
    println!("{}", CredentialCodec::generate_key());
}

/// Run the scheduler until Ctrl-C.
pub async fn serve(app: &App) -> anyhow::Result<()> {
    let scheduler = app.scheduler();
    scheduler.start().await;
    info!(
        backup_dir = %app.config.backup.dir,
        format = %app.config.backup.format,
        "pgkeeper serving; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    scheduler.stop().await;
    Ok(())
}

pub async fn datasource(app: &App, command: DatasourceCommand) -> anyhow::Result<()> {
    match command {
        DatasourceCommand::Add(add) => add_datasource(app, add),
        DatasourceCommand::List { json } => {
            let all = app.catalog.list_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                print_datasources(&all);
            }
            Ok(())
        }
        DatasourceCommand::Show { id, json } => {
            let ds = app.catalog.get(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ds)?);
            } else {
                print_datasource(&ds);
            }
            Ok(())
        }
        DatasourceCommand::Update(update) => {
            let id = update.id.clone();
            let ds = app.update_datasource(&id, update.into())?;
            println!("updated {id}");
            print_datasource(&ds);
            Ok(())
        }
        DatasourceCommand::Remove { id } => {
            app.catalog.delete(&id)?;
            println!("removed {id}");
            Ok(())
        }
        DatasourceCommand::Enable { id } => {
            app.catalog.set_enabled(&id, true)?;
            println!("enabled {id}");
            Ok(())
        }
        DatasourceCommand::Disable { id } => {
            app.catalog.set_enabled(&id, false)?;
            println!("disabled {id}");
            Ok(())
        }
        DatasourceCommand::Schedule {
            id,
            expression,
            description,
        } => {
            schedule::validate(&expression)?;
            app.catalog.set_schedule(&id, &expression, description.as_deref())?;
            println!("{id} now runs on \"{expression}\"");
            Ok(())
        }
        DatasourceCommand::Test { id } => {
            let ds = app.decrypted_datasource(&id)?;
            app.orchestrator.test_connection(&ds).await?;
            println!("{}@{}:{}/{} is reachable", ds.username, ds.host, ds.port, ds.database);
            Ok(())
        }
        DatasourceCommand::CreateDb { id } => {
            let ds = app.decrypted_datasource(&id)?;
            app.orchestrator.create_database(&ds).await?;
            println!("created database {}", ds.database);
            Ok(())
        }
        DatasourceCommand::DropDb { id, yes } => {
            if !yes {
                bail!("refusing to drop a database without --yes");
            }
            let ds = app.decrypted_datasource(&id)?;
            app.orchestrator.drop_database(&ds).await?;
            println!("dropped database {}", ds.database);
            Ok(())
        }
    }
}

pub async fn backup(app: &App, command: BackupCommand) -> anyhow::Result<()> {
    match command {
        BackupCommand::Run { datasource_id } => {
            let (task, produced) = app.spawn_backup(&datasource_id)?;
            println!("backup initiated (task {task})");

            finish(wait_for(&app.tasks, &task).await)?;
            let record = produced.await.context("backup task finished without a record")?;
            print_records(std::slice::from_ref(&record));
            Ok(())
        }
        BackupCommand::List { datasource, json } => {
            let records = app.records.list(datasource.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records);
            }
            Ok(())
        }
        BackupCommand::Show { backup_id, json } => {
            let record = app.records.get(&backup_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_records(std::slice::from_ref(&record));
            }
            Ok(())
        }
        BackupCommand::Restore {
            backup_id,
            target,
            yes,
        } => {
            if !yes {
                bail!("restore drops every schema in the target database; pass --yes to proceed");
            }
            let command = app.command.clone();
            let subject = backup_id.clone();
            let task = app.tasks.spawn(TaskKind::Restore, subject, async move {
                command.restore(&backup_id, target.as_deref()).await
            });
            println!("restore initiated (task {task})");
            finish(wait_for(&app.tasks, &task).await)
        }
        BackupCommand::Delete { backup_id } => {
            app.command.delete_backup(&backup_id).await?;
            println!("deleted {backup_id}");
            Ok(())
        }
    }
}

fn add_datasource(app: &App, add: AddDatasource) -> anyhow::Result<()> {
    schedule::validate(&add.schedule)?;
    let ds = Datasource::new(
        add.host,
        add.port,
        add.database,
        add.username,
        add.password,
        add.ssl_mode,
        ScheduleSpec {
            expression: add.schedule,
            description: add.description,
            enabled: !add.disabled,
        },
    );
    app.catalog.create(&ds.encrypted(&app.codec)?)?;
    println!("{}", ds.id);
    Ok(())
}

impl From<UpdateDatasource> for DatasourceChanges {
    fn from(u: UpdateDatasource) -> Self {
        Self {
            host: u.host,
            port: u.port,
            database: u.database,
            username: u.username,
            password: u.password,
            ssl_mode: u.ssl_mode,
            schedule: u.schedule,
            description: u.description,
        }
    }
}

/// Poll until the task leaves `running`.
async fn wait_for(tasks: &TaskRegistry, id: &TaskId) -> Option<TaskInfo> {
    loop {
        let info = tasks.status(id)?;
        if info.status != TaskStatus::Running {
            return Some(info);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn finish(info: Option<TaskInfo>) -> anyhow::Result<()> {
    let Some(info) = info else {
        bail!("task disappeared from the registry");
    };
    let elapsed = info
        .finished_at
        .map(|f| (f - info.started_at).num_seconds())
        .unwrap_or_default();
    match info.status {
        TaskStatus::Completed => {
            println!("{} finished in {elapsed}s", info.kind);
            Ok(())
        }
        _ => bail!(
            "{} failed after {elapsed}s: {}",
            info.kind,
            info.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn print_datasources(all: &[Datasource]) {
    println!(
        "{:<36}  {:<24}  {:<16}  {:<18}  {}",
        "ID", "SERVER", "DATABASE", "SCHEDULE", "ENABLED"
    );
    for ds in all {
        println!(
            "{:<36}  {:<24}  {:<16}  {:<18}  {}",
            ds.id,
            format!("{}:{}", ds.host, ds.port),
            ds.database,
            ds.schedule.expression,
            if ds.schedule.enabled { "yes" } else { "no" }
        );
    }
}

fn print_datasource(ds: &Datasource) {
    println!("id:          {}", ds.id);
    println!("server:      {}:{}", ds.host, ds.port);
    println!("database:    {}", ds.database);
    println!("username:    {}", ds.username);
    println!("ssl mode:    {}", ds.ssl_mode);
    println!("schedule:    {}", ds.schedule.expression);
    if !ds.schedule.description.is_empty() {
        println!("description: {}", ds.schedule.description);
    }
    println!("enabled:     {}", if ds.schedule.enabled { "yes" } else { "no" });
}

fn print_records(records: &[BackupRecord]) {
    println!(
        "{:<36}  {:<10}  {:<11}  {:>12}  {:<20}  {}",
        "ID", "TRIGGER", "STATUS", "SIZE", "FINISHED", "FILE"
    );
    for r in records {
        let finished = r
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<10}  {:<11}  {:>12}  {:<20}  {}",
            r.id,
            r.trigger.to_string(),
            r.status.to_string(),
            r.file_size,
            finished,
            r.file_name
        );
    }
}
