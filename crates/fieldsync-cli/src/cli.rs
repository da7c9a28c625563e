use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_core::RecordKind;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Capture inspection records offline and sync them when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH", env = "FIELDSYNC_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the records API
    #[arg(long, global = true, value_name = "URL", env = "FIELDSYNC_API_BASE_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the records API
    #[arg(
        long,
        global = true,
        value_name = "TOKEN",
        env = "FIELDSYNC_API_TOKEN",
        hide_env_values = true
    )]
    pub token: Option<String>,

    /// Inspector identity records are written for
    #[arg(long, global = true, value_name = "ID", env = "FIELDSYNC_OWNER_ID")]
    pub owner: Option<String>,

    /// Directory holding captured media until it is uploaded
    #[arg(long, global = true, value_name = "PATH", env = "FIELDSYNC_MEDIA_DIR")]
    pub media_dir: Option<PathBuf>,

    /// Skip the connectivity probe and work offline
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspection reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Assigned tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Reconcile pending records with the remote store now
    Sync {
        /// Only sync one record kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Show pending, failed and cached record counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the background scheduler until interrupted
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "30")]
        probe_interval: u64,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Write a new report
    #[command(alias = "new")]
    Add {
        /// Report title
        title: Vec<String>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Keep the report as a local draft
        #[arg(long)]
        draft: bool,
        /// Attach an image or video file (repeatable)
        #[arg(long = "media", value_name = "PATH")]
        media: Vec<PathBuf>,
    },
    /// List your reports
    List {
        /// Number of reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit a draft report
    Promote {
        /// Report ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List your tasks
    List {
        /// Number of tasks to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a task's status
    Status {
        /// Task ID
        id: String,
        /// New status, e.g. "in_progress" or "done"
        status: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Report,
    Task,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Report => Self::Report,
            KindArg::Task => Self::Task,
        }
    }
}
