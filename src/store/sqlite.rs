//! SQLite backend.
//!
//! One connection behind a mutex; every call runs on the blocking pool. The
//! partial unique index keeps two enabled entries off the same slot, and the
//! type check runs inside an IMMEDIATE transaction so concurrent writers
//! cannot slip a second schedule type into a zone.

use super::{guard, ModeStore, ScheduleStore};
use crate::entry::{
    weekday_from_index, weekday_index, DaySelector, EntryId, EntryUpdate, NewScheduleEntry,
    ScheduleEntry, ScheduleType,
};
use crate::error::{ClimateError, Result, StoreError};
use crate::mode::TrackedMode;
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use climate_protocol::ZoneId;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS zone_schedules (
    schedule_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    zone_id       INTEGER NOT NULL,
    schedule_type INTEGER NOT NULL CHECK (schedule_type IN (1, 2, 3)),
    day_of_week   INTEGER CHECK (day_of_week BETWEEN 0 AND 6),
    day_type      TEXT CHECK (day_type IN ('weekday', 'weekend')),
    time          TEXT NOT NULL,
    temperature   REAL NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_zone_schedules_lookup
    ON zone_schedules (zone_id, enabled, schedule_type);
CREATE UNIQUE INDEX IF NOT EXISTS idx_zone_schedules_slot
    ON zone_schedules (zone_id, schedule_type, IFNULL(day_of_week, -1), IFNULL(day_type, ''), time)
    WHERE enabled = 1;
CREATE TABLE IF NOT EXISTS app_config (
    config_key   TEXT PRIMARY KEY,
    config_value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS zone_modes (
    zone_id      INTEGER PRIMARY KEY,
    tracked_mode INTEGER NOT NULL
);
";

const COLUMNS: &str =
    "schedule_id, zone_id, schedule_type, day_of_week, day_type, time, temperature, enabled";

const TIMEZONE_KEY: &str = "timezone";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteStore> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        SqliteStore::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<SqliteStore> {
        SqliteStore::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<SqliteStore> {
        conn.execute_batch(SCHEMA)?;
        debug!("schedule schema ready");
        Ok(SqliteStore { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

struct Columns {
    schedule_type: i64,
    day_of_week: Option<i64>,
    day_type: Option<&'static str>,
}

fn columns(day: DaySelector) -> Columns {
    let (day_of_week, day_type) = match day {
        DaySelector::DayOfWeek(d) => (Some(i64::from(weekday_index(d))), None),
        DaySelector::Weekday => (None, Some("weekday")),
        DaySelector::Weekend => (None, Some("weekend")),
        DaySelector::AllDay => (None, None),
    };
    Columns { schedule_type: day.schedule_type().code(), day_of_week, day_type }
}

fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn parse_time(id: EntryId, text: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|e| StoreError::Corrupt { id, detail: format!("time {:?}: {}", text, e) })
}

fn zone_id(id: i64, raw: i64) -> Result<ZoneId, StoreError> {
    u32::try_from(raw)
        .map(ZoneId)
        .map_err(|_| StoreError::Corrupt { id, detail: format!("zone id {}", raw) })
}

struct RawEntry {
    id: EntryId,
    zone: i64,
    schedule_type: i64,
    day_of_week: Option<i64>,
    day_type: Option<String>,
    time: String,
    temperature: f64,
    enabled: bool,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            id: row.get(0)?,
            zone: row.get(1)?,
            schedule_type: row.get(2)?,
            day_of_week: row.get(3)?,
            day_type: row.get(4)?,
            time: row.get(5)?,
            temperature: row.get(6)?,
            enabled: row.get(7)?,
        })
    }

    fn decode(self) -> Result<ScheduleEntry, StoreError> {
        let id = self.id;
        let corrupt = |detail: String| StoreError::Corrupt { id, detail };
        let schedule_type = ScheduleType::from_code(self.schedule_type)
            .ok_or_else(|| corrupt(format!("schedule type {}", self.schedule_type)))?;
        let day = match (schedule_type, self.day_of_week, self.day_type.as_deref()) {
            (ScheduleType::DayOfWeek, Some(index), _) => u8::try_from(index)
                .ok()
                .and_then(weekday_from_index)
                .map(DaySelector::DayOfWeek)
                .ok_or_else(|| corrupt(format!("day of week {}", index)))?,
            (ScheduleType::WeekdayWeekend, _, Some("weekday")) => DaySelector::Weekday,
            (ScheduleType::WeekdayWeekend, _, Some("weekend")) => DaySelector::Weekend,
            (ScheduleType::AllDay, _, _) => DaySelector::AllDay,
            (t, dow, dt) => return Err(corrupt(format!("{} with day {:?}/{:?}", t, dow, dt))),
        };
        Ok(ScheduleEntry {
            id,
            zone: zone_id(id, self.zone)?,
            day,
            time: parse_time(id, &self.time)?,
            temperature: self.temperature,
            enabled: self.enabled,
        })
    }
}

fn query_entries(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ScheduleEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, RawEntry::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter()
        .map(|r| r.decode().map_err(ClimateError::from))
        .collect()
}

fn zone_entries(conn: &Connection, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
    query_entries(
        conn,
        &format!("SELECT {} FROM zone_schedules WHERE zone_id = ?1 ORDER BY time, schedule_id", COLUMNS),
        params![zone.0],
    )
}

fn entry_by_id(conn: &Connection, id: EntryId) -> Result<Option<ScheduleEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM zone_schedules WHERE schedule_id = ?1", COLUMNS),
        params![id],
        RawEntry::from_row,
    )
    .optional()?
    .map(|raw| raw.decode().map_err(ClimateError::from))
    .transpose()
}

/// The unique slot index firing means the guard lost a race or was bypassed.
fn write_error(e: rusqlite::Error) -> ClimateError {
    match e {
        rusqlite::Error::SqliteFailure(ref f, ref msg) if f.code == ErrorCode::ConstraintViolation => {
            ClimateError::InvalidScheduleEntry(
                msg.clone().unwrap_or_else(|| "schedule constraint violated".to_string()),
            )
        }
        other => other.into(),
    }
}

fn insert(tx: &Transaction<'_>, entry: &NewScheduleEntry) -> Result<ScheduleEntry> {
    let existing = zone_entries(tx, entry.zone)?;
    guard::check(&entry.clone().into_entry(0), &existing, None)?;
    let c = columns(entry.day);
    tx.execute(
        "INSERT INTO zone_schedules (zone_id, schedule_type, day_of_week, day_type, time, temperature, enabled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.zone.0,
            c.schedule_type,
            c.day_of_week,
            c.day_type,
            format_time(entry.time),
            entry.temperature,
            entry.enabled
        ],
    )
    .map_err(write_error)?;
    Ok(entry.clone().into_entry(tx.last_insert_rowid()))
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_entry(&self, entry: NewScheduleEntry) -> Result<ScheduleEntry> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created = insert(&tx, &entry)?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<ScheduleEntry> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = entry_by_id(&tx, id)?.ok_or(ClimateError::NotFound(id))?;
            let updated = update.apply_to(&current);
            guard::check(&updated, &zone_entries(&tx, updated.zone)?, Some(id))?;
            let c = columns(updated.day);
            tx.execute(
                "UPDATE zone_schedules
                 SET schedule_type = ?2, day_of_week = ?3, day_type = ?4, time = ?5, temperature = ?6, enabled = ?7
                 WHERE schedule_id = ?1",
                params![
                    id,
                    c.schedule_type,
                    c.day_of_week,
                    c.day_type,
                    format_time(updated.time),
                    updated.temperature,
                    updated.enabled
                ],
            )
            .map_err(write_error)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn delete_entry(&self, id: EntryId) -> Result<bool> {
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM zone_schedules WHERE schedule_id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<ScheduleEntry>> {
        self.with_conn(move |conn| entry_by_id(conn, id)).await
    }

    async fn entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
        self.with_conn(move |conn| zone_entries(conn, zone)).await
    }

    async fn enabled_entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
        self.with_conn(move |conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {} FROM zone_schedules WHERE zone_id = ?1 AND enabled = 1 ORDER BY time, schedule_id",
                    COLUMNS
                ),
                params![zone.0],
            )
        })
        .await
    }

    async fn enabled_entries_on(&self, zone: ZoneId, day: Weekday) -> Result<Vec<ScheduleEntry>> {
        let part = if day.num_days_from_monday() < 5 { "weekday" } else { "weekend" };
        let index = i64::from(weekday_index(day));
        self.with_conn(move |conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {} FROM zone_schedules
                     WHERE zone_id = ?1 AND enabled = 1
                       AND (schedule_type = 3
                            OR (schedule_type = 2 AND day_type = ?2)
                            OR (schedule_type = 1 AND day_of_week = ?3))
                     ORDER BY time, schedule_id",
                    COLUMNS
                ),
                params![zone.0, part, index],
            )
        })
        .await
    }

    async fn clear_zone(&self, zone: ZoneId) -> Result<usize> {
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM zone_schedules WHERE zone_id = ?1", params![zone.0])?)
        })
        .await
    }

    async fn replace_zone(&self, zone: ZoneId, entries: Vec<NewScheduleEntry>) -> Result<Vec<ScheduleEntry>> {
        if let Some(stray) = entries.iter().find(|e| e.zone != zone) {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "entry for zone {} in schedule of zone {}",
                stray.zone, zone
            )));
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM zone_schedules WHERE zone_id = ?1", params![zone.0])?;
            let created = entries
                .iter()
                .map(|e| insert(&tx, e))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    async fn zones(&self) -> Result<Vec<ZoneId>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT zone_id FROM zone_schedules WHERE enabled = 1 ORDER BY zone_id")?;
            let raw = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|z| zone_id(0, z).map_err(ClimateError::from))
                .collect()
        })
        .await
    }

    async fn timezone(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT config_value FROM app_config WHERE config_key = ?1",
                    params![TIMEZONE_KEY],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set_timezone(&self, timezone: Option<&str>) -> Result<()> {
        let timezone = timezone.map(str::to_owned);
        self.with_conn(move |conn| {
            match timezone {
                Some(tz) => conn.execute(
                    "INSERT INTO app_config (config_key, config_value) VALUES (?1, ?2)
                     ON CONFLICT(config_key) DO UPDATE SET config_value = excluded.config_value",
                    params![TIMEZONE_KEY, tz],
                )?,
                None => conn.execute("DELETE FROM app_config WHERE config_key = ?1", params![TIMEZONE_KEY])?,
            };
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ModeStore for SqliteStore {
    async fn load_modes(&self) -> Result<Vec<(ZoneId, TrackedMode)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT zone_id, tracked_mode FROM zone_modes ORDER BY zone_id")?;
            let raw = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|(zone, code)| -> Result<(ZoneId, TrackedMode)> {
                    let mode = TrackedMode::from_code(code).ok_or(StoreError::Corrupt {
                        id: zone,
                        detail: format!("tracked mode {}", code),
                    })?;
                    Ok((zone_id(zone, zone)?, mode))
                })
                .collect()
        })
        .await
    }

    async fn save_mode(&self, zone: ZoneId, mode: TrackedMode) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO zone_modes (zone_id, tracked_mode) VALUES (?1, ?2)
                 ON CONFLICT(zone_id) DO UPDATE SET tracked_mode = excluded.tracked_mode",
                params![zone.0, mode.code()],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(zone: u32, day: DaySelector, h: u32, m: u32, temperature: f64) -> NewScheduleEntry {
        NewScheduleEntry {
            zone: ZoneId(zone),
            day,
            time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            temperature,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn entries_survive_the_row_encoding() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let a = store.create_entry(new_entry(3, DaySelector::DayOfWeek(Weekday::Sun), 6, 45, 19.5)).await?;
        let b = store.create_entry(new_entry(3, DaySelector::DayOfWeek(Weekday::Mon), 6, 45, 21.0)).await?;
        assert_ne!(a.id, b.id);

        assert_eq!(store.get_entry(a.id).await?, Some(a.clone()));
        assert_eq!(store.entries(ZoneId(3)).await?.len(), 2);
        assert_eq!(store.enabled_entries_on(ZoneId(3), Weekday::Sun).await?, vec![a]);
        Ok(())
    }

    #[tokio::test]
    async fn type_exclusivity_and_slot_uniqueness() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.create_entry(new_entry(1, DaySelector::Weekday, 7, 0, 21.0)).await?;

        let mixed = store.create_entry(new_entry(1, DaySelector::AllDay, 7, 0, 21.0)).await;
        assert!(matches!(mixed, Err(ClimateError::InvalidScheduleEntry(_))));

        let dup = store.create_entry(new_entry(1, DaySelector::Weekday, 7, 0, 22.0)).await;
        assert!(matches!(dup, Err(ClimateError::InvalidScheduleEntry(_))));

        let mut disabled = new_entry(1, DaySelector::Weekday, 7, 0, 22.0);
        disabled.enabled = false;
        let disabled = store.create_entry(disabled).await?;
        let enable = store
            .update_entry(disabled.id, EntryUpdate { enabled: Some(true), ..Default::default() })
            .await;
        assert!(matches!(enable, Err(ClimateError::InvalidScheduleEntry(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unique_index_backs_up_the_guard() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.create_entry(new_entry(1, DaySelector::AllDay, 8, 0, 20.0)).await?;
        let raw = store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO zone_schedules (zone_id, schedule_type, time, temperature, enabled)
                     VALUES (1, 3, '08:00', 25.0, 1)",
                    [],
                )
                .map_err(write_error)
            })
            .await;
        assert!(matches!(raw, Err(ClimateError::InvalidScheduleEntry(_))));
        Ok(())
    }

    #[tokio::test]
    async fn update_and_missing_entry() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let e = store.create_entry(new_entry(1, DaySelector::AllDay, 8, 0, 20.0)).await?;
        let updated = store
            .update_entry(e.id, EntryUpdate { temperature: Some(21.5), ..Default::default() })
            .await?;
        assert_eq!(store.get_entry(e.id).await?, Some(updated));

        assert!(matches!(
            store.update_entry(999, EntryUpdate::default()).await,
            Err(ClimateError::NotFound(999))
        ));
        assert!(store.delete_entry(e.id).await?);
        assert!(!store.delete_entry(e.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn replace_zone_switches_type_atomically() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.create_entry(new_entry(1, DaySelector::AllDay, 8, 0, 20.0)).await?;

        let rejected = store
            .replace_zone(
                ZoneId(1),
                vec![new_entry(1, DaySelector::Weekend, 9, 0, 21.0), new_entry(1, DaySelector::AllDay, 9, 0, 21.0)],
            )
            .await;
        assert!(rejected.is_err());
        let kept = store.entries(ZoneId(1)).await?;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].day, DaySelector::AllDay);

        store
            .replace_zone(
                ZoneId(1),
                vec![new_entry(1, DaySelector::Weekend, 9, 0, 21.0), new_entry(1, DaySelector::Weekday, 6, 30, 20.0)],
            )
            .await?;
        let days: Vec<DaySelector> = store.entries(ZoneId(1)).await?.iter().map(|e| e.day).collect();
        assert_eq!(days, vec![DaySelector::Weekday, DaySelector::Weekend]);
        Ok(())
    }

    #[tokio::test]
    async fn timezone_and_modes_persist() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        assert_eq!(store.timezone().await?, None);
        store.set_timezone(Some("Europe/Berlin")).await?;
        store.set_timezone(Some("Australia/Sydney")).await?;
        assert_eq!(store.timezone().await?.as_deref(), Some("Australia/Sydney"));
        store.set_timezone(None).await?;
        assert_eq!(store.timezone().await?, None);

        store.save_mode(ZoneId(2), TrackedMode::Auto).await?;
        store.save_mode(ZoneId(1), TrackedMode::Off).await?;
        store.save_mode(ZoneId(2), TrackedMode::Heat).await?;
        assert_eq!(
            store.load_modes().await?,
            vec![(ZoneId(1), TrackedMode::Off), (ZoneId(2), TrackedMode::Heat)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn zones_lists_only_enabled_schedules() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.create_entry(new_entry(5, DaySelector::AllDay, 8, 0, 20.0)).await?;
        let mut off = new_entry(2, DaySelector::AllDay, 8, 0, 20.0);
        off.enabled = false;
        store.create_entry(off).await?;
        store.create_entry(new_entry(1, DaySelector::AllDay, 8, 0, 20.0)).await?;
        assert_eq!(store.zones().await?, vec![ZoneId(1), ZoneId(5)]);
        assert_eq!(store.clear_zone(ZoneId(5)).await?, 1);
        assert_eq!(store.zones().await?, vec![ZoneId(1)]);
        Ok(())
    }
}
