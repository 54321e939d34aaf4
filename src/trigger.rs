//! Recurring-execution triggers.
//!
//! A trigger turns into a loop inside the scheduler; each firing behaves like
//! an internally-issued `run_once`. Cron expressions use the 6/7-field form
//! (seconds first) and are validated at startup.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::TriggerSpec;
use crate::error::{JobRigError, Result};

/// A parsed, ready-to-run schedule specification.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires at the times a cron expression yields.
    Cron(Box<Schedule>),
    /// Fires at a fixed rate, optionally after an initial delay.
    FixedRate {
        every: Duration,
        initial_delay: Option<Duration>,
    },
}

impl Trigger {
    /// Parse a configuration-level spec, failing startup on malformed input.
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self> {
        match spec {
            TriggerSpec::Cron { cron } => {
                let schedule =
                    Schedule::from_str(cron).map_err(|e| JobRigError::InvalidTrigger {
                        spec: cron.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Self::Cron(Box::new(schedule)))
            }
            TriggerSpec::FixedRate {
                every,
                initial_delay,
            } => {
                if every.is_zero() {
                    return Err(JobRigError::InvalidTrigger {
                        spec: "every = 0s".to_string(),
                        reason: "fixed-rate period must be positive".to_string(),
                    });
                }
                Ok(Self::FixedRate {
                    every: *every,
                    initial_delay: *initial_delay,
                })
            }
        }
    }

    /// The next firing instant strictly after `after`, or `None` when the
    /// schedule is exhausted.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&after).next(),
            Self::FixedRate { every, .. } => {
                after.checked_add_signed(chrono::Duration::from_std(*every).ok()?)
            }
        }
    }

    /// Delay before the first firing. Fixed-rate triggers without an explicit
    /// initial delay wait one full period rather than firing immediately.
    pub fn first_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Cron(_) => {
                let next = self.next_fire(now)?;
                (next - now).to_std().ok()
            }
            Self::FixedRate {
                every,
                initial_delay,
            } => Some(initial_delay.unwrap_or(*every)),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(schedule) => write!(f, "cron '{}'", schedule),
            Self::FixedRate { every, .. } => write!(f, "every {:?}", every),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_parse_and_next_fire() {
        let trigger = Trigger::from_spec(&TriggerSpec::Cron {
            cron: "0 0 2 * * *".to_string(),
        })
        .unwrap();

        let after = Utc::now();
        let next = trigger.next_fire(after).unwrap();
        assert!(next > after);
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let err = Trigger::from_spec(&TriggerSpec::Cron {
            cron: "not a cron".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, JobRigError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = Trigger::from_spec(&TriggerSpec::FixedRate {
            every: Duration::ZERO,
            initial_delay: None,
        })
        .unwrap_err();
        assert!(matches!(err, JobRigError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_fixed_rate_fire_times() {
        let trigger = Trigger::from_spec(&TriggerSpec::FixedRate {
            every: Duration::from_secs(60),
            initial_delay: Some(Duration::from_secs(5)),
        })
        .unwrap();

        let now = Utc::now();
        assert_eq!(trigger.first_delay(now), Some(Duration::from_secs(5)));
        let next = trigger.next_fire(now).unwrap();
        assert_eq!((next - now).num_seconds(), 60);
    }

    #[test]
    fn test_fixed_rate_defaults_to_one_period() {
        let trigger = Trigger::from_spec(&TriggerSpec::FixedRate {
            every: Duration::from_secs(30),
            initial_delay: None,
        })
        .unwrap();
        assert_eq!(
            trigger.first_delay(Utc::now()),
            Some(Duration::from_secs(30))
        );
    }
}
