mod cli;
mod config;
mod connectivity;
mod db;
mod domain;
mod engine;
mod export;
mod queue;
mod remote;
mod service;
mod store;
mod ui;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use cli::{Commands, SettingsSubcommands};
use config::SyncConfig;
use connectivity::{EventProbe, PollingProbe};
use domain::record::{DailyRecord, WeeklyRecord};
use engine::DrainOutcome;
use remote::{DirectoryRemote, RemoteStore};
use service::{AppError, Tracker, TrackerOptions};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("DSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn run() -> Result<(), AppError> {
    use clap::Parser;

    let cli = cli::Cli::parse();
    if let Commands::Completions(args) = &cli.command {
        let mut command = cli::styled_command();
        clap_complete::generate(args.shell, &mut command, "dsync", &mut std::io::stdout());
        return Ok(());
    }
    if let Commands::Wipe(args) = &cli.command {
        if !args.yes {
            return Err(AppError::InvalidInput(
                "wipe deletes every local record and unsynced change; pass --yes to confirm"
                    .to_string(),
            ));
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_command(cli));
    // The stdin event reader blocks on a worker thread until input closes.
    runtime.shutdown_timeout(std::time::Duration::from_millis(200));
    result
}

async fn run_command(cli: cli::Cli) -> Result<(), AppError> {
    let config = SyncConfig::load(cli.config.as_deref())?;
    let remote: Arc<dyn RemoteStore> = Arc::new(DirectoryRemote::new(cli.remote.clone()));
    let tracker = Tracker::open(TrackerOptions {
        db_path: cli.db.clone(),
        remote: remote.clone(),
        config,
        online: cli.offline.then_some(false),
    })
    .await?;

    match cli.command {
        Commands::Save(args) => {
            let record: DailyRecord = read_json_input(args.file.as_deref())?;
            let date = record.date.clone();
            tracker.save_daily_data(record).await?;
            let status = tracker.get_sync_status()?;
            if args.json {
                print_json(&tracker.load_daily_data(&date).await?);
            } else {
                println!("saved {} (pending sync: {})", date, status.pending_sync);
            }
        }
        Commands::Show(args) => {
            let record = tracker
                .load_daily_data(&args.date)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("daily record for {}", args.date)))?;
            if args.json {
                print_json(&record);
            } else {
                ui::print_daily(&record);
            }
        }
        Commands::List(args) => {
            let records = tracker.get_all_daily_data()?;
            if args.json {
                print_json(&records);
            } else {
                ui::print_daily_list(&records);
            }
        }
        Commands::Week(args) => {
            let week = tracker
                .load_weekly_data(&args.date)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("week containing {}", args.date)))?;
            if args.json {
                print_json(&week);
            } else {
                ui::print_week(&week);
            }
        }
        Commands::SaveWeek(args) => {
            let record: WeeklyRecord = read_json_input(args.file.as_deref())?;
            let stored = tracker.save_weekly_data(record).await?;
            if args.json {
                print_json(&stored);
            } else {
                println!(
                    "saved week {} ({} pts, {})",
                    stored.week_start, stored.total_points, stored.ranking
                );
            }
        }
        Commands::Export(args) => {
            let rendered = tracker.export_weekly_data(&args.week_start).await?;
            match args.out {
                Some(path) => {
                    std::fs::write(&path, format!("{rendered}\n"))?;
                    println!("exported {} to {}", args.week_start, path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Status(args) => {
            let status = tracker.get_sync_status()?;
            if args.json {
                print_json(&status);
            } else {
                ui::print_status(&status);
            }
        }
        Commands::Sync(args) => {
            if args.retry_flagged {
                let requeued = tracker.retry_flagged()?;
                if !args.json {
                    println!("requeued {} flagged entries", requeued);
                }
            }
            let outcome = tracker.force_sync().await;
            print_drain_outcome(&outcome, tracker.get_sync_status()?.pending_sync, args.json);
        }
        Commands::Queue(args) => {
            let entries = tracker.queue_entries(args.limit)?;
            if args.json {
                print_json(&entries);
            } else {
                ui::print_queue(&entries);
            }
        }
        Commands::Settings(args) => match args.command {
            SettingsSubcommands::Get(get) => match tracker.get_setting(&get.key)? {
                Some(value) => println!("{value}"),
                None => return Err(AppError::NotFound(format!("setting '{}'", get.key))),
            },
            SettingsSubcommands::Set(set) => {
                tracker.set_setting(&set.key, &set.value)?;
                println!("set {}", set.key);
            }
            SettingsSubcommands::List(list) => {
                let settings = tracker.list_settings()?;
                if list.json {
                    print_json(&settings);
                } else {
                    for setting in settings {
                        println!("{}={}", setting.key, setting.value);
                    }
                }
            }
        },
        Commands::Watch(args) => {
            let monitor = tracker.monitor();
            let retry_tick = tracker.config().retry_tick;
            if args.stdin_events {
                let (events, mut probe) = EventProbe::channel(16);
                tokio::spawn(forward_stdin_events(events));
                tokio::select! {
                    _ = monitor.run(&mut probe, retry_tick) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            } else {
                let mut probe = PollingProbe::new(remote, tracker.config().poll_interval);
                tokio::select! {
                    _ = monitor.run(&mut probe, retry_tick) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            let status = tracker.get_sync_status()?;
            println!("watch stopped (pending sync: {})", status.pending_sync);
        }
        Commands::Wipe(_) => {
            let summary = tracker.wipe_all_local_data()?;
            println!(
                "wiped {} daily, {} weekly, {} queued, {} setting(s)",
                summary.daily_records,
                summary.weekly_records,
                summary.queue_entries,
                summary.settings
            );
        }
        Commands::Completions(_) => unreachable!("completions return before the tracker opens"),
    }

    tracker.close()?;
    Ok(())
}

fn print_drain_outcome(outcome: &DrainOutcome, pending: u64, json: bool) {
    match outcome {
        DrainOutcome::Completed(summary) if json => print_json(summary),
        DrainOutcome::Completed(summary) => println!("{}", ui::format_drain_summary(summary)),
        DrainOutcome::Offline => {
            println!("offline; {} change(s) stay queued", pending);
        }
        DrainOutcome::AlreadyRunning => println!("a sync is already running"),
    }
}

fn read_json_input<T: DeserializeOwned>(file: Option<&Path>) -> Result<T, AppError> {
    let raw = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(&raw).map_err(|err| AppError::InvalidInput(format!("invalid JSON: {err}")))
}

/// Maps `online`/`offline` lines to probe events until stdin closes.
async fn forward_stdin_events(events: tokio::sync::mpsc::Sender<bool>) {
    use tokio::io::AsyncBufReadExt;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let online = match line.trim().to_ascii_lowercase().as_str() {
            "online" | "up" | "1" => true,
            "offline" | "down" | "0" => false,
            "" => continue,
            other => {
                tracing::warn!(line = other, "ignoring unknown connectivity event");
                continue;
            }
        };
        if events.send(online).await.is_err() {
            return;
        }
    }
}
