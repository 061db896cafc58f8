//! Persistence seams.
//!
//! [`ScheduleStore`] is the operator-facing schedule table plus the timezone
//! setting; [`ModeStore`] belongs to the mode tracker alone. Both backends
//! enforce the per-zone schedule invariants through [`guard`].

use crate::entry::{EntryId, EntryUpdate, NewScheduleEntry, ScheduleEntry};
use crate::error::Result;
use crate::mode::TrackedMode;
use async_trait::async_trait;
use chrono::Weekday;
use climate_protocol::ZoneId;

pub mod guard;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Rejects an entry whose schedule type differs from the zone's other
    /// entries, or whose slot an enabled entry already holds.
    async fn create_entry(&self, entry: NewScheduleEntry) -> Result<ScheduleEntry>;

    async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<ScheduleEntry>;

    async fn delete_entry(&self, id: EntryId) -> Result<bool>;

    async fn get_entry(&self, id: EntryId) -> Result<Option<ScheduleEntry>>;

    /// All entries of a zone, disabled ones included, ordered by time.
    async fn entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>>;

    async fn enabled_entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>>;

    /// Enabled entries of a zone that apply on `day`.
    async fn enabled_entries_on(&self, zone: ZoneId, day: Weekday) -> Result<Vec<ScheduleEntry>>;

    /// Removes every entry of a zone and returns how many went.
    async fn clear_zone(&self, zone: ZoneId) -> Result<usize>;

    /// Swaps a zone's whole schedule in one step, which is also how a zone
    /// changes schedule type.
    async fn replace_zone(&self, zone: ZoneId, entries: Vec<NewScheduleEntry>) -> Result<Vec<ScheduleEntry>>;

    /// Zones with at least one enabled entry.
    async fn zones(&self) -> Result<Vec<ZoneId>>;

    async fn timezone(&self) -> Result<Option<String>>;

    async fn set_timezone(&self, timezone: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait ModeStore: Send + Sync {
    async fn load_modes(&self) -> Result<Vec<(ZoneId, TrackedMode)>>;

    async fn save_mode(&self, zone: ZoneId, mode: TrackedMode) -> Result<()>;
}
