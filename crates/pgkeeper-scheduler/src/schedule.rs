use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// A parsed schedule expression.
///
/// Six fields with a leading seconds field (`sec min hour dom month dow`),
/// optionally followed by a year: `0 0 3 * * *` is 03:00:00 every day,
/// `*/5 * * * * *` every five seconds.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let inner = cron::Schedule::from_str(trimmed).map_err(|e| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: trimmed.to_string(),
            inner,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `from`, or `None` once the schedule is
    /// exhausted (only possible with an explicit year field).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&from).next()
    }
}

/// Check an expression without keeping the parsed form.
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression).map(|_| ())
}
