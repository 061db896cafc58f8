//! Local wall-clock time for the scheduler.
//!
//! The calendar comes from the `timezone` setting in the store. It is cached
//! for a TTL so a tick does not hit the store on every zone; an invalid or
//! absent setting means UTC.

use crate::error::{ClimateError, Result};
use crate::store::ScheduleStore;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TIMEZONE_TTL_SECS: u64 = 3600;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> ManualClock {
        ManualClock { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Parses an IANA identifier such as `Europe/Amsterdam`.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ClimateError::InvalidTimezone(name.to_string()))
}

#[derive(Debug, Clone, Copy)]
struct Cached {
    tz: Tz,
    at: DateTime<Utc>,
}

pub struct TimeSource {
    clock: Arc<dyn Clock>,
    store: Arc<dyn ScheduleStore>,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
    warned: Mutex<HashSet<String>>,
}

impl TimeSource {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn ScheduleStore>, ttl: std::time::Duration) -> TimeSource {
        TimeSource {
            clock,
            store,
            ttl: Duration::from_std(ttl).unwrap_or(Duration::seconds(DEFAULT_TIMEZONE_TTL_SECS as i64)),
            cache: Mutex::new(None),
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The configured calendar, re-read from the store once the cached value
    /// is older than the TTL.
    pub async fn timezone(&self) -> Tz {
        let now = self.clock.now();
        let cached = *self.cache.lock();
        if let Some(c) = cached {
            if now - c.at < self.ttl {
                return c.tz;
            }
        }

        match self.store.timezone().await {
            Ok(name) => {
                let tz = self.interpret(name.as_deref());
                *self.cache.lock() = Some(Cached { tz, at: now });
                tz
            }
            Err(e) => {
                // Keep serving the last good value and try again next call.
                warn!(error = %e, "failed to read timezone setting");
                cached.map_or(Tz::UTC, |c| c.tz)
            }
        }
    }

    pub async fn local_now(&self) -> DateTime<Tz> {
        let tz = self.timezone().await;
        self.now_utc().with_timezone(&tz)
    }

    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Validates and stores a new calendar. `None` or a blank name resets to UTC.
    pub async fn reconfigure(&self, name: Option<&str>) -> Result<Tz> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let tz = match name {
            Some(n) => resolve_timezone(n)?,
            None => Tz::UTC,
        };
        self.store.set_timezone(name).await?;
        self.invalidate();
        info!(timezone = %tz, "timezone reconfigured");
        Ok(tz)
    }

    fn interpret(&self, name: Option<&str>) -> Tz {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Tz::UTC;
        };
        match resolve_timezone(name) {
            Ok(tz) => tz,
            Err(_) => {
                if self.warned.lock().insert(name.to_string()) {
                    warn!(timezone = name, "invalid timezone setting, falling back to UTC");
                }
                Tz::UTC
            }
        }
    }
}
