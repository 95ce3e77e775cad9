use serde::{Deserialize, Serialize};

use super::week::{InvalidDate, WeekWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Morning,
    Passions,
    Evening,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Morning => "morning",
            TaskCategory::Passions => "passions",
            TaskCategory::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub text: String,
    pub category: TaskCategory,
    pub priority: TaskPriority,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    pub date: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, alias = "batsnackPoints")]
    pub point_balance: i64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub general_note: String,
}

impl DailyRecord {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            tasks: Vec::new(),
            point_balance: 0,
            notes: String::new(),
            general_note: String::new(),
        }
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| task.completed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyRecord {
    pub week_start: String,
    pub week_end: String,
    #[serde(default, alias = "dailyData")]
    pub daily_records: Vec<DailyRecord>,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub ranking: String,
}

impl WeeklyRecord {
    pub fn empty(window: WeekWindow) -> Self {
        let mut record = Self {
            week_start: window.start_key(),
            week_end: window.end_key(),
            daily_records: Vec::new(),
            total_points: 0,
            ranking: String::new(),
        };
        record.recalculate();
        record
    }

    /// Builds the week containing `date` from the given member records,
    /// dropping any that fall outside the window.
    pub fn from_members(
        date: &str,
        members: impl IntoIterator<Item = DailyRecord>,
    ) -> Result<Self, InvalidDate> {
        let window = WeekWindow::containing_iso(date)?;
        let mut record = Self::empty(window);
        record.daily_records = members
            .into_iter()
            .filter(|member| window.contains_key(&member.date))
            .collect();
        record.recalculate();
        Ok(record)
    }

    /// Re-sorts members and recomputes every derived field from scratch.
    pub fn recalculate(&mut self) {
        self.daily_records
            .sort_by(|left, right| left.date.cmp(&right.date));
        self.daily_records.dedup_by(|later, earlier| {
            if later.date == earlier.date {
                *earlier = later.clone();
                true
            } else {
                false
            }
        });
        self.total_points = self
            .daily_records
            .iter()
            .map(|member| member.point_balance)
            .sum();
        self.ranking = WeeklyRanking::for_points(self.total_points)
            .as_str()
            .to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeeklyRanking {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
    Master,
}

impl WeeklyRanking {
    pub fn for_points(points: i64) -> Self {
        match points {
            p if p >= 50 => WeeklyRanking::Master,
            p if p >= 35 => WeeklyRanking::Expert,
            p if p >= 25 => WeeklyRanking::Advanced,
            p if p >= 15 => WeeklyRanking::Intermediate,
            _ => WeeklyRanking::Beginner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeeklyRanking::Beginner => "Beginner",
            WeeklyRanking::Intermediate => "Intermediate",
            WeeklyRanking::Advanced => "Advanced",
            WeeklyRanking::Expert => "Expert",
            WeeklyRanking::Master => "Master",
        }
    }
}
