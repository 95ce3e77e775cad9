use std::io::{self, IsTerminal};

use crate::domain::record::{DailyRecord, Task, WeeklyRecord};
use crate::engine::DrainSummary;
use crate::queue::QueueEntryView;
use crate::service::SyncStatus;

pub fn print_daily(record: &DailyRecord) {
    let palette = Palette::auto();
    println!(
        "{} {}",
        palette.heading(&record.date),
        palette.points(record.point_balance)
    );
    if record.tasks.is_empty() {
        println!("{}", palette.dim("no tasks"));
    }
    for task in &record.tasks {
        println!("{}", format_task_row(task, &palette));
    }
    if !record.notes.is_empty() {
        println!("{} {}", palette.dim("notes:"), record.notes);
    }
    if !record.general_note.is_empty() {
        println!("{} {}", palette.dim("note:"), record.general_note);
    }
}

pub fn print_daily_list(records: &[DailyRecord]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Days"));
    if records.is_empty() {
        println!("{}", palette.dim("no local records"));
        return;
    }
    for record in records {
        println!("{}", format_day_row(record, &palette));
    }
    println!("{}", palette.dim(&format!("{} day(s)", records.len())));
}

pub fn print_week(week: &WeeklyRecord) {
    let palette = Palette::auto();
    println!(
        "{} {}",
        palette.heading(&format!("Week {} .. {}", week.week_start, week.week_end)),
        palette.rank(&week.ranking)
    );
    for record in &week.daily_records {
        println!("{}", format_day_row(record, &palette));
    }
    println!("{} {}", palette.dim("total:"), palette.points(week.total_points));
}

pub fn print_status(status: &SyncStatus) {
    let palette = Palette::auto();
    let state = if !status.is_online {
        palette.warn("offline")
    } else if status.degraded {
        palette.warn("online (degraded)")
    } else {
        palette.ok("online")
    };
    println!("{} {}", palette.dim("connection:"), state);
    println!("{} {}", palette.dim("pending:"), status.pending_sync);
    if status.flagged > 0 {
        println!(
            "{} {}",
            palette.dim("flagged:"),
            palette.warn(&status.flagged.to_string())
        );
    }
    println!(
        "{} {}",
        palette.dim("last sync:"),
        status.last_sync_at.as_deref().unwrap_or("never")
    );
}

pub fn format_drain_summary(summary: &DrainSummary) -> String {
    let mut line = format!(
        "pushed {}, failed {}, deferred {}, remaining {}",
        summary.pushed, summary.failed, summary.deferred, summary.remaining
    );
    if summary.flagged > 0 {
        line.push_str(&format!(", newly flagged {}", summary.flagged));
    }
    if summary.interrupted {
        line.push_str(" (interrupted: remote unavailable)");
    }
    line
}

pub fn print_queue(entries: &[QueueEntryView]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Sync queue"));
    if entries.is_empty() {
        println!("{}", palette.dim("queue is empty"));
        return;
    }
    for entry in entries {
        let state = if entry.synced {
            palette.ok("synced")
        } else if entry.flagged {
            palette.warn("flagged")
        } else {
            palette.dim("pending")
        };
        let mut line = format!(
            "#{} {} {} {} {}",
            entry.id, entry.operation, entry.key, state, entry.timestamp
        );
        if entry.attempts > 0 {
            line.push_str(&format!(" attempts={}", entry.attempts));
        }
        if let Some(error) = entry.last_error.as_deref() {
            line.push(' ');
            line.push_str(&palette.dim(error));
        }
        println!("{line}");
    }
}

fn format_day_row(record: &DailyRecord, palette: &Palette) -> String {
    format!(
        "{} {} {}",
        record.date,
        palette.points(record.point_balance),
        palette.dim(&format!(
            "{}/{} done",
            record.completed_tasks(),
            record.tasks.len()
        ))
    )
}

fn format_task_row(task: &Task, palette: &Palette) -> String {
    let mark = if task.completed { "[x]" } else { "[ ]" };
    let mut line = format!(
        "{} {} {} {}",
        mark,
        task.text,
        palette.dim(&format!("({})", task.category.as_str())),
        palette.dim(task.priority.as_str())
    );
    if !task.note.is_empty() {
        line.push_str(&format!(" - {}", task.note));
    }
    line
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    fn ok(&self, text: &str) -> String {
        self.paint("32", text)
    }

    fn warn(&self, text: &str) -> String {
        self.paint("33", text)
    }

    fn points(&self, points: i64) -> String {
        let code = if points < 0 { "31" } else { "32" };
        self.paint(code, &format!("{points:+} pts"))
    }

    fn rank(&self, ranking: &str) -> String {
        self.paint("35", &format!("[{ranking}]"))
    }
}
