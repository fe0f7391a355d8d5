//! Settlement window management
//!
//! A window is a time-of-day range during which a rail accepts batch
//! settlement for a tenant. Times are local to the configured UTC offset.
//! Windows with `open_time > close_time` cross midnight; the part after
//! midnight belongs to the previous day's session, so the holiday check
//! uses the date the window opened.
//!
//! A (tenant, rail) with no window configured is always open.

use crate::types::Rail;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use ledger_core::TenantId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Window schedule for one (tenant, rail)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementWindowConfig {
    /// Tenant
    pub tenant_id: TenantId,

    /// Rail
    pub rail: Rail,

    /// Local opening time, "HH:MM"
    pub open_time: String,

    /// Local closing time, "HH:MM" (exclusive)
    pub close_time: String,

    /// Offset of local time from UTC, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Holiday calendar (country code) consulted for business days
    #[serde(default)]
    pub holiday_calendar: Option<String>,

    /// Whether the window also opens on Saturday and Sunday
    #[serde(default)]
    pub weekends_open: bool,
}

impl SettlementWindowConfig {
    /// Parse open and close times
    fn parse_times(&self) -> Result<(NaiveTime, NaiveTime)> {
        let parse = |time_str: &str| {
            NaiveTime::parse_from_str(time_str, "%H:%M").map_err(|e| {
                Error::Config(format!("Invalid time format '{}': {}", time_str, e))
            })
        };
        Ok((parse(&self.open_time)?, parse(&self.close_time)?))
    }

    /// Reject schedules that can never open or times that do not parse
    pub fn validate(&self) -> Result<()> {
        let (open, close) = self.parse_times()?;
        if open == close {
            return Err(Error::Config(format!(
                "Window for {} opens and closes at {}",
                self.rail, self.open_time
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config(format!(
                "UTC offset out of range: {} minutes",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Session date the window at `now` belongs to, or `None` outside the
    /// time range
    fn session_date(&self, now: DateTime<Utc>) -> Result<Option<NaiveDate>> {
        let (open, close) = self.parse_times()?;
        let local = now.naive_utc() + Duration::minutes(self.utc_offset_minutes as i64);
        let time = local.time();
        let date = local.date();

        let session = if open < close {
            (time >= open && time < close).then_some(date)
        } else if time >= open {
            Some(date)
        } else if time < close {
            date.pred_opt()
        } else {
            None
        };
        Ok(session)
    }
}

/// Business-day source for holiday checks
pub trait HolidayCalendar: Send + Sync {
    /// Whether `date` is a listed holiday for `calendar`
    fn is_holiday(&self, calendar: &str, date: NaiveDate) -> bool;

    /// Weekdays that are not holidays
    fn is_business_day(&self, calendar: &str, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.is_holiday(calendar, date)
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Fixed list of holidays per calendar
#[derive(Debug, Default, Clone)]
pub struct StaticHolidayCalendar {
    holidays: HashMap<String, HashSet<NaiveDate>>,
}

impl StaticHolidayCalendar {
    /// Empty calendar
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a holiday
    pub fn with_holiday(mut self, calendar: &str, date: NaiveDate) -> Self {
        self.add_holiday(calendar, date);
        self
    }

    /// Add a holiday in place
    pub fn add_holiday(&mut self, calendar: &str, date: NaiveDate) {
        self.holidays
            .entry(calendar.to_ascii_uppercase())
            .or_default()
            .insert(date);
    }
}

impl HolidayCalendar for StaticHolidayCalendar {
    fn is_holiday(&self, calendar: &str, date: NaiveDate) -> bool {
        self.holidays
            .get(&calendar.to_ascii_uppercase())
            .map(|dates| dates.contains(&date))
            .unwrap_or(false)
    }
}

/// Window manager
pub struct WindowManager {
    windows: RwLock<HashMap<(TenantId, Rail), SettlementWindowConfig>>,
    calendar: Arc<dyn HolidayCalendar>,
}

impl WindowManager {
    /// Create window manager
    pub fn new(calendar: Arc<dyn HolidayCalendar>) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            calendar,
        }
    }

    /// Install or replace the window for a (tenant, rail)
    pub fn set_window(&self, config: SettlementWindowConfig) -> Result<()> {
        config.validate()?;
        info!(
            tenant_id = %config.tenant_id,
            rail = %config.rail,
            open = %config.open_time,
            close = %config.close_time,
            "Settlement window configured"
        );
        self.windows
            .write()
            .insert((config.tenant_id, config.rail), config);
        Ok(())
    }

    /// Drop the window for a (tenant, rail); it becomes always open
    pub fn remove_window(&self, tenant_id: TenantId, rail: Rail) -> Option<SettlementWindowConfig> {
        self.windows.write().remove(&(tenant_id, rail))
    }

    /// Configured window
    pub fn window(&self, tenant_id: TenantId, rail: Rail) -> Option<SettlementWindowConfig> {
        self.windows.read().get(&(tenant_id, rail)).cloned()
    }

    /// Whether the rail accepts settlement for the tenant at `now`
    pub fn is_window_open(&self, tenant_id: TenantId, rail: Rail, now: DateTime<Utc>) -> Result<bool> {
        let Some(config) = self.window(tenant_id, rail) else {
            return Ok(true);
        };

        let Some(session) = config.session_date(now)? else {
            debug!(tenant_id = %tenant_id, rail = %rail, "Outside window hours");
            return Ok(false);
        };

        if is_weekend(session) && !config.weekends_open {
            debug!(tenant_id = %tenant_id, rail = %rail, %session, "Window closed for weekend");
            return Ok(false);
        }

        if let Some(calendar) = &config.holiday_calendar {
            if self.calendar.is_holiday(calendar, session) {
                debug!(tenant_id = %tenant_id, rail = %rail, %session, calendar = %calendar, "Window closed for holiday");
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl std::fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowManager")
            .field("windows", &self.windows.read().len())
            .finish()
    }
}
