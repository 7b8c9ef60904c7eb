use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "contactdb",
    about = "Contact database duplicate merge tool",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file; `database_path`, `[logging]` and `[merge]` apply.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the crate and database schema versions
    Info,
    /// Show the merge plan for a set of duplicate contacts
    Plan(PlanArgs),
    /// Merge duplicate contacts into one primary
    Merge(MergeArgs),
    /// Print the live primary for a contact id
    Resolve(ContactArgs),
    /// List every row referencing a contact
    References(ContactArgs),
    /// List contacts sharing a name or email address
    Duplicates(DuplicatesArgs),
    /// Hide a reviewed duplicate group from the pending list
    Dismiss(DismissArgs),
}

#[derive(Args)]
pub struct DbArgs {
    /// SQLite database file; overrides `database_path` from the config
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub db: DbArgs,
    /// Candidate to keep; defaults to the first id
    #[arg(long)]
    pub primary: Option<Uuid>,
    /// Candidate contact ids
    #[arg(required = true, num_args = 2..)]
    pub ids: Vec<Uuid>,
}

#[derive(Args)]
pub struct MergeArgs {
    #[command(flatten)]
    pub db: DbArgs,
    /// Candidate to keep
    #[arg(long)]
    pub primary: Uuid,
    /// Conflict choice as `field=<json>`, e.g. `first_name="John"`
    #[arg(long = "resolve", value_name = "FIELD=JSON")]
    pub resolutions: Vec<String>,
    /// Candidate contact ids
    #[arg(required = true, num_args = 2..)]
    pub ids: Vec<Uuid>,
}

#[derive(Args)]
pub struct ContactArgs {
    #[command(flatten)]
    pub db: DbArgs,
    pub id: Uuid,
}

#[derive(Args)]
pub struct DuplicatesArgs {
    #[command(flatten)]
    pub db: DbArgs,
    /// Include dismissed groups
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct DismissArgs {
    #[command(flatten)]
    pub db: DbArgs,
    /// Every contact id of the group
    #[arg(required = true, num_args = 2..)]
    pub ids: Vec<Uuid>,
}
