use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::format_rfc3339;
use crate::domain::record::WeeklyRecord;
use crate::store::StorageError;

pub const EXPORT_VERSION: &str = "1.0.0";

/// Snapshot of one week for sharing or backup. Reads back as a plain
/// `WeeklyRecord` since the extra fields are ignored there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyExport {
    #[serde(flatten)]
    pub week: WeeklyRecord,
    pub export_date: String,
    pub version: String,
}

impl WeeklyExport {
    pub fn new(week: WeeklyRecord, exported_at: OffsetDateTime) -> Self {
        Self {
            week,
            export_date: format_rfc3339(exported_at),
            version: EXPORT_VERSION.to_string(),
        }
    }

    pub fn to_pretty_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug)]
pub enum ExportError {
    Storage(StorageError),
    NotFound(String),
    Serialize(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Storage(err) => write!(f, "{}", err),
            ExportError::NotFound(week_start) => {
                write!(f, "no weekly data found for week starting {}", week_start)
            }
            ExportError::Serialize(err) => write!(f, "failed to render export: {}", err),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExportError::Storage(err) => Some(err),
            ExportError::NotFound(_) => None,
            ExportError::Serialize(err) => Some(err),
        }
    }
}

impl From<StorageError> for ExportError {
    fn from(value: StorageError) -> Self {
        ExportError::Storage(value)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(value: serde_json::Error) -> Self {
        ExportError::Serialize(value)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{WeeklyExport, EXPORT_VERSION};
    use crate::domain::record::{DailyRecord, WeeklyRecord};

    #[test]
    fn export_is_pretty_and_reads_back_as_weekly_record() {
        let mut day = DailyRecord::new("2024-01-15");
        day.point_balance = 16;
        let week = WeeklyRecord::from_members("2024-01-14", vec![day]).expect("week");

        let rendered = WeeklyExport::new(week.clone(), datetime!(2024-01-20 18:30:00 UTC))
            .to_pretty_json()
            .expect("export should render");
        assert!(rendered.contains("\n  \"weekStart\": \"2024-01-14\""));

        let value: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(value["exportDate"], "2024-01-20T18:30:00Z");
        assert_eq!(value["version"], EXPORT_VERSION);
        assert_eq!(value["ranking"], "Intermediate");

        let back: WeeklyRecord = serde_json::from_str(&rendered).expect("weekly record");
        assert_eq!(back, week);
        let full: WeeklyExport = serde_json::from_str(&rendered).expect("export");
        assert_eq!(full.week.week_start, "2024-01-14");
    }
}
