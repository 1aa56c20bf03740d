use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "activations",
    version,
    about = "Local activation-metrics store and edit tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Status(StatusArgs),
    Get(GetArgs),
    Set(SetArgs),
    Migrate(MigrateArgs),
    Seed(SeedArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendKind {
    File,
    Sqlite,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/activations")]
    pub data_root: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    #[arg(long)]
    pub table_path: Option<PathBuf>,

    #[arg(long)]
    pub site: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    #[arg(long, default_value = ".cache/activations")]
    pub data_root: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    #[arg(long)]
    pub table_path: Option<PathBuf>,

    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub metric: String,
}

#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    #[arg(long, default_value = ".cache/activations")]
    pub data_root: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    #[arg(long)]
    pub table_path: Option<PathBuf>,

    #[arg(long)]
    pub site: String,

    /// METRIC=VALUE pairs; the last assignment to a metric wins.
    #[arg(required = true)]
    pub edits: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[arg(long, default_value = ".cache/activations")]
    pub data_root: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    #[arg(long)]
    pub table_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SeedArgs {
    #[arg(long, default_value = ".cache/activations")]
    pub data_root: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    #[arg(long)]
    pub table_path: Option<PathBuf>,

    #[arg(long)]
    pub site: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}
