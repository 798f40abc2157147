use clap::{Args, Parser, Subcommand};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PGKEEPER_GIT_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "pgkeeper", version = VERSION, about = "Scheduled PostgreSQL backups")]
pub struct Cli {
    /// Config file (default: ~/.pgkeeper/pgkeeper.toml).
    #[arg(long, global = true, env = "PGKEEPER_CONFIG", value_name = "PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until interrupted.
    Serve,
    /// Print a new base64 encryption key for `security.encryption_key`.
    Keygen,
    /// Manage registered databases.
    Datasource {
        #[command(subcommand)]
        command: DatasourceCommand,
    },
    /// Run, list, restore and delete backups.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatasourceCommand {
    /// Register a database.
    Add(AddDatasource),
    /// List registered databases.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one registered database.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Change connection details in place, keeping the id and its backups.
    Update(UpdateDatasource),
    /// Unregister a database. Its backups are kept.
    Remove { id: String },
    /// Resume scheduled backups.
    Enable { id: String },
    /// Pause scheduled backups.
    Disable { id: String },
    /// Change the cron expression (seconds field first).
    Schedule {
        id: String,
        expression: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Check that the server accepts the stored credentials.
    Test { id: String },
    /// CREATE DATABASE on the datasource's server.
    CreateDb { id: String },
    /// DROP DATABASE on the datasource's server.
    DropDb {
        id: String,
        /// Required: the database and all its data are removed.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddDatasource {
    #[arg(long, default_value = "localhost")]
    pub host: String,
    #[arg(long, default_value_t = 5432)]
    pub port: u16,
    #[arg(long)]
    pub database: String,
    #[arg(long)]
    pub username: String,
    #[arg(long, env = "PGKEEPER_DS_PASSWORD", hide_env_values = true)]
    pub password: String,
    #[arg(long, default_value = "disable")]
    pub ssl_mode: String,
    /// Cron expression with a seconds field, e.g. "0 0 3 * * *".
    #[arg(long, default_value = "0 0 3 * * *")]
    pub schedule: String,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Register without scheduling.
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Args, Debug)]
pub struct UpdateDatasource {
    pub id: String,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub database: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    /// New password; stored encrypted.
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub ssl_mode: Option<String>,
    #[arg(long)]
    pub schedule: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Back up one datasource now and wait for the outcome.
    Run { datasource_id: String },
    /// List backup records, newest first.
    List {
        #[arg(long)]
        datasource: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one backup record.
    Show {
        backup_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Clear the target database and load a completed backup into it.
    Restore {
        backup_id: String,
        /// Restore into this datasource instead of the one backed up.
        #[arg(long)]
        target: Option<String>,
        /// Required: every schema in the target is dropped first.
        #[arg(long)]
        yes: bool,
    },
    /// Delete a backup file and its record.
    Delete { backup_id: String },
}
