use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "dsync")]
#[command(bin_name = "dsync")]
#[command(version)]
#[command(about = "Offline-first daily tracker storage with queued remote sync")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        global = true,
        env = "DSYNC_DB_PATH",
        default_value = ".dailysync/state.sqlite",
        help = "Path to the local SQLite database."
    )]
    pub db: String,

    #[arg(
        short = 'r',
        long,
        global = true,
        env = "DSYNC_REMOTE_DIR",
        default_value = ".dailysync/remote",
        help = "Directory holding the remote copy of every record."
    )]
    pub remote: PathBuf,

    #[arg(
        long,
        global = true,
        env = "DSYNC_CONFIG",
        help = "TOML file overriding the built-in sync settings."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Treat the remote as unreachable; writes stay queued locally."
    )]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Save a daily record from a JSON file or stdin.")]
    Save(SaveArgs),
    #[command(about = "Show the daily record for one date.")]
    Show(ShowArgs),
    #[command(about = "List every local daily record.")]
    List(JsonArgs),
    #[command(about = "Show the week containing a date.")]
    Week(ShowArgs),
    #[command(name = "save-week", about = "Save a weekly record from a JSON file or stdin.")]
    SaveWeek(SaveArgs),
    #[command(about = "Export one week as pretty-printed JSON.")]
    Export(ExportArgs),
    #[command(about = "Show online state and pending sync count.")]
    Status(JsonArgs),
    #[command(about = "Push queued changes to the remote now.")]
    Sync(SyncArgs),
    #[command(about = "List recent sync queue entries.")]
    Queue(QueueArgs),
    #[command(about = "Read or write user settings.")]
    Settings(SettingsArgs),
    #[command(about = "Watch connectivity and sync whenever the remote comes back.")]
    Watch(WatchArgs),
    #[command(about = "Delete all local records, queued changes, and settings.")]
    Wipe(WipeArgs),
    #[command(about = "Print a shell completion script.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long, help = "Print JSON instead of text.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    #[arg(help = "JSON file to read. Reads stdin when omitted or '-'.")]
    pub file: Option<PathBuf>,

    #[arg(long, help = "Print the stored record as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(help = "ISO date (YYYY-MM-DD).")]
    pub date: String,

    #[arg(long, help = "Print JSON instead of text.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(help = "Week start date, or any date within the week.")]
    pub week_start: String,

    #[arg(short = 'o', long, help = "Write the export to this file instead of stdout.")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long, help = "Return flagged entries to the queue before syncing.")]
    pub retry_flagged: bool,

    #[arg(long, help = "Print JSON instead of text.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[arg(short = 'n', long, default_value_t = 20, help = "Number of entries to show.")]
    pub limit: u32,

    #[arg(long, help = "Print JSON instead of text.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum SettingsSubcommands {
    #[command(about = "Print one setting.")]
    Get(SettingGetArgs),
    #[command(about = "Store one setting.")]
    Set(SettingSetArgs),
    #[command(about = "List all settings.")]
    List(JsonArgs),
}

#[derive(Debug, Args)]
pub struct SettingGetArgs {
    pub key: String,
}

#[derive(Debug, Args)]
pub struct SettingSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(
        long,
        help = "Read 'online'/'offline' lines from stdin instead of polling the remote."
    )]
    pub stdin_events: bool,
}

#[derive(Debug, Args)]
pub struct WipeArgs {
    #[arg(long, help = "Confirm the irreversible wipe.")]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(value_enum, help = "Shell to generate completions for.")]
    pub shell: clap_complete::Shell,
}
