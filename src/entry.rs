use crate::error::{ClimateError, Result};
use crate::slot::SlotGrid;
use chrono::{NaiveTime, Weekday};
use climate_protocol::ZoneId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type EntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    DayOfWeek,
    WeekdayWeekend,
    AllDay,
}

impl ScheduleType {
    /// Numeric code kept in the `zone_schedules` table.
    pub fn code(self) -> i64 {
        match self {
            ScheduleType::DayOfWeek => 1,
            ScheduleType::WeekdayWeekend => 2,
            ScheduleType::AllDay => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<ScheduleType> {
        match code {
            1 => Some(ScheduleType::DayOfWeek),
            2 => Some(ScheduleType::WeekdayWeekend),
            3 => Some(ScheduleType::AllDay),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduleType::DayOfWeek => "DAY_OF_WEEK",
            ScheduleType::WeekdayWeekend => "WEEKDAY_WEEKEND",
            ScheduleType::AllDay => "ALL_DAY",
        })
    }
}

/// Which days an entry applies to. Schedule type and day key in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DaySelectorRepr", into = "DaySelectorRepr")]
pub enum DaySelector {
    DayOfWeek(Weekday),
    Weekday,
    Weekend,
    AllDay,
}

impl DaySelector {
    pub fn schedule_type(self) -> ScheduleType {
        match self {
            DaySelector::DayOfWeek(_) => ScheduleType::DayOfWeek,
            DaySelector::Weekday | DaySelector::Weekend => ScheduleType::WeekdayWeekend,
            DaySelector::AllDay => ScheduleType::AllDay,
        }
    }

    pub fn applies_on(self, day: Weekday) -> bool {
        match self {
            DaySelector::AllDay => true,
            DaySelector::Weekday => is_workday(day),
            DaySelector::Weekend => !is_workday(day),
            DaySelector::DayOfWeek(d) => d == day,
        }
    }
}

impl fmt::Display for DaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaySelector::DayOfWeek(d) => write!(f, "{}", d),
            DaySelector::Weekday => f.write_str("weekday"),
            DaySelector::Weekend => f.write_str("weekend"),
            DaySelector::AllDay => f.write_str("all days"),
        }
    }
}

fn is_workday(day: Weekday) -> bool {
    day.num_days_from_monday() < 5
}

/// Monday is 0.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_index(day: Weekday) -> u8 {
    // num_days_from_monday is 0..=6
    day.num_days_from_monday() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WeekPart {
    Weekday,
    Weekend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum DayKeyRepr {
    Index(u8),
    Part(WeekPart),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DaySelectorRepr {
    schedule_type: ScheduleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    day_key: Option<DayKeyRepr>,
}

impl TryFrom<DaySelectorRepr> for DaySelector {
    type Error = String;

    fn try_from(repr: DaySelectorRepr) -> std::result::Result<Self, Self::Error> {
        match (repr.schedule_type, repr.day_key) {
            (ScheduleType::DayOfWeek, Some(DayKeyRepr::Index(i))) => weekday_from_index(i)
                .map(DaySelector::DayOfWeek)
                .ok_or_else(|| format!("day_key {} is not a weekday index 0-6", i)),
            (ScheduleType::WeekdayWeekend, Some(DayKeyRepr::Part(WeekPart::Weekday))) => {
                Ok(DaySelector::Weekday)
            }
            (ScheduleType::WeekdayWeekend, Some(DayKeyRepr::Part(WeekPart::Weekend))) => {
                Ok(DaySelector::Weekend)
            }
            (ScheduleType::AllDay, None) => Ok(DaySelector::AllDay),
            (t, key) => Err(format!("day_key {:?} does not fit schedule type {}", key, t)),
        }
    }
}

impl From<DaySelector> for DaySelectorRepr {
    fn from(day: DaySelector) -> Self {
        let day_key = match day {
            DaySelector::DayOfWeek(d) => Some(DayKeyRepr::Index(weekday_index(d))),
            DaySelector::Weekday => Some(DayKeyRepr::Part(WeekPart::Weekday)),
            DaySelector::Weekend => Some(DayKeyRepr::Part(WeekPart::Weekend)),
            DaySelector::AllDay => None,
        };
        DaySelectorRepr { schedule_type: day.schedule_type(), day_key }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: EntryId,
    pub zone: ZoneId,
    #[serde(flatten)]
    pub day: DaySelector,
    pub time: NaiveTime,
    pub temperature: f64,
    pub enabled: bool,
}

impl ScheduleEntry {
    pub fn schedule_type(&self) -> ScheduleType {
        self.day.schedule_type()
    }

    /// Two enabled entries of one zone never share this key.
    pub fn slot_key(&self) -> (DaySelector, NaiveTime) {
        (self.day, self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduleEntry {
    pub zone: ZoneId,
    #[serde(flatten)]
    pub day: DaySelector,
    pub time: NaiveTime,
    pub temperature: f64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl NewScheduleEntry {
    pub fn into_entry(self, id: EntryId) -> ScheduleEntry {
        ScheduleEntry {
            id,
            zone: self.zone,
            day: self.day,
            time: self.time,
            temperature: self.temperature,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    #[serde(default)]
    pub day: Option<DaySelector>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl EntryUpdate {
    pub fn apply_to(&self, entry: &ScheduleEntry) -> ScheduleEntry {
        ScheduleEntry {
            id: entry.id,
            zone: entry.zone,
            day: self.day.unwrap_or(entry.day),
            time: self.time.unwrap_or(entry.time),
            temperature: self.temperature.unwrap_or(entry.temperature),
            enabled: self.enabled.unwrap_or(entry.enabled),
        }
    }
}

/// Write-time validation of a single entry. Cross-entry invariants are the
/// store's job.
#[derive(Debug, Clone, Copy)]
pub struct EntryRules {
    pub grid: SlotGrid,
    pub min_temperature: f64,
    pub max_temperature: f64,
}

impl EntryRules {
    pub fn check(&self, time: NaiveTime, temperature: f64) -> Result<()> {
        if !self.grid.is_aligned(time) {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "{} is not on the {} minute grid",
                time.format("%H:%M:%S"),
                self.grid.minutes()
            )));
        }
        if !temperature.is_finite() {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "temperature {} is not a number",
                temperature
            )));
        }
        if temperature < self.min_temperature || temperature > self.max_temperature {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "temperature {:.1} outside {:.1}..={:.1}",
                temperature, self.min_temperature, self.max_temperature
            )));
        }
        Ok(())
    }

    pub fn check_new(&self, entry: &NewScheduleEntry) -> Result<()> {
        self.check(entry.time, entry.temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> EntryRules {
        EntryRules { grid: SlotGrid::new(15).unwrap(), min_temperature: 5.0, max_temperature: 30.0 }
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn day_applicability() {
        assert!(DaySelector::AllDay.applies_on(Weekday::Sun));
        assert!(DaySelector::Weekday.applies_on(Weekday::Fri));
        assert!(!DaySelector::Weekday.applies_on(Weekday::Sat));
        assert!(DaySelector::Weekend.applies_on(Weekday::Sat));
        assert!(DaySelector::Weekend.applies_on(Weekday::Sun));
        assert!(!DaySelector::Weekend.applies_on(Weekday::Mon));
        assert!(DaySelector::DayOfWeek(Weekday::Wed).applies_on(Weekday::Wed));
        assert!(!DaySelector::DayOfWeek(Weekday::Wed).applies_on(Weekday::Thu));
    }

    #[test]
    fn weekday_index_round_trip_is_monday_based() {
        assert_eq!(weekday_index(Weekday::Mon), 0);
        assert_eq!(weekday_index(Weekday::Sun), 6);
        assert_eq!(weekday_from_index(5), Some(Weekday::Sat));
        assert_eq!(weekday_from_index(7), None);
    }

    #[test]
    fn entry_json_carries_type_and_day_key() -> anyhow::Result<()> {
        let entry: NewScheduleEntry = serde_json::from_str(
            r#"{"zone":4,"schedule_type":"WEEKDAY_WEEKEND","day_key":"WEEKEND","time":"08:00:00","temperature":20.0}"#,
        )?;
        assert_eq!(entry.day, DaySelector::Weekend);
        assert!(entry.enabled);

        let entry: NewScheduleEntry = serde_json::from_str(
            r#"{"zone":4,"schedule_type":"DAY_OF_WEEK","day_key":2,"time":"06:30:00","temperature":19.0,"enabled":false}"#,
        )?;
        assert_eq!(entry.day, DaySelector::DayOfWeek(Weekday::Wed));

        let json = serde_json::to_value(entry.into_entry(7))?;
        assert_eq!(json["schedule_type"], "DAY_OF_WEEK");
        assert_eq!(json["day_key"], 2);
        assert_eq!(json["id"], 7);
        Ok(())
    }

    #[test]
    fn mismatched_day_key_is_rejected() {
        let bad = [
            r#"{"zone":1,"schedule_type":"ALL_DAY","day_key":3,"time":"08:00:00","temperature":20.0}"#,
            r#"{"zone":1,"schedule_type":"DAY_OF_WEEK","day_key":9,"time":"08:00:00","temperature":20.0}"#,
            r#"{"zone":1,"schedule_type":"WEEKDAY_WEEKEND","time":"08:00:00","temperature":20.0}"#,
        ];
        for json in bad {
            assert!(serde_json::from_str::<NewScheduleEntry>(json).is_err(), "{}", json);
        }
    }

    #[test]
    fn rules_reject_off_grid_and_out_of_range() {
        let rules = rules();
        assert!(rules.check(hm(8, 0), 20.0).is_ok());
        assert!(matches!(rules.check(hm(8, 5), 20.0), Err(ClimateError::InvalidScheduleEntry(_))));
        assert!(rules.check(NaiveTime::from_hms_opt(8, 0, 30).unwrap(), 20.0).is_err());
        assert!(rules.check(hm(8, 0), f64::NAN).is_err());
        assert!(rules.check(hm(8, 0), f64::INFINITY).is_err());
        assert!(rules.check(hm(8, 0), 4.5).is_err());
        assert!(rules.check(hm(8, 0), 30.5).is_err());
        assert!(rules.check(hm(8, 0), 30.0).is_ok());
    }

    #[test]
    fn update_overrides_only_given_fields() {
        let entry = ScheduleEntry {
            id: 1,
            zone: ZoneId(1),
            day: DaySelector::AllDay,
            time: hm(8, 0),
            temperature: 20.0,
            enabled: true,
        };
        let updated = EntryUpdate { temperature: Some(21.0), ..Default::default() }.apply_to(&entry);
        assert_eq!(updated.temperature, 21.0);
        assert_eq!(updated.time, entry.time);
        assert_eq!(updated.day, entry.day);
        assert!(updated.enabled);
    }
}
