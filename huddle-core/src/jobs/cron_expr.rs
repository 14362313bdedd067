use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{HuddleError, Result};

/// A parsed cron expression.
///
/// Accepts the classic five-field form (`min hour dom month dow`) as well as
/// the six/seven-field form with a leading seconds field. Five-field
/// expressions fire at second zero.
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    schedule: Schedule,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let source = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized = match source.split(' ').count() {
            5 => format!("0 {source}"),
            6 | 7 => source.clone(),
            n => {
                return Err(HuddleError::InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, found {n}"),
                });
            }
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| HuddleError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { source, schedule })
    }

    /// The expression as declared, whitespace-normalised. This is what gets
    /// stored and compared during reconciliation.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpr {}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpr {
    type Err = HuddleError;

    fn from_str(s: &str) -> Result<Self> {
        CronExpr::parse(s)
    }
}
