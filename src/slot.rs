use chrono::{Duration, NaiveTime, Timelike};

pub const DEFAULT_SLOT_MINUTES: u32 = 15;

/// Fixed time grid that schedule entries and the current instant are aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    minutes: u32,
}

impl SlotGrid {
    /// `minutes` must divide the hour so every slot starts at the same
    /// offsets each hour.
    pub fn new(minutes: u32) -> Option<SlotGrid> {
        (minutes > 0 && 60 % minutes == 0).then_some(SlotGrid { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn seconds(&self) -> u64 {
        u64::from(self.minutes) * 60
    }

    /// Floors `time` to the start of its slot. 10:07 on a 15 minute grid is 10:00.
    pub fn floor(&self, time: NaiveTime) -> NaiveTime {
        let excess_secs = (time.minute() % self.minutes) * 60 + time.second();
        time - Duration::seconds(i64::from(excess_secs))
            - Duration::nanoseconds(i64::from(time.nanosecond()))
    }

    pub fn is_aligned(&self, time: NaiveTime) -> bool {
        time.second() == 0 && time.nanosecond() == 0 && time.minute() % self.minutes == 0
    }
}

impl Default for SlotGrid {
    fn default() -> Self {
        SlotGrid { minutes: DEFAULT_SLOT_MINUTES }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn rejects_grid_not_dividing_hour() {
        assert!(SlotGrid::new(0).is_none());
        assert!(SlotGrid::new(7).is_none());
        assert!(SlotGrid::new(90).is_none());
        assert_eq!(SlotGrid::new(5).map(|g| g.minutes()), Some(5));
    }

    #[test]
    fn floors_not_rounds() {
        let grid = SlotGrid::new(15).unwrap();
        assert_eq!(grid.floor(hms(10, 7, 0)), hms(10, 0, 0));
        assert_eq!(grid.floor(hms(10, 14, 59)), hms(10, 0, 0));
        assert_eq!(grid.floor(hms(10, 15, 0)), hms(10, 15, 0));
        assert_eq!(grid.floor(hms(23, 59, 59)), hms(23, 45, 0));
        assert_eq!(grid.floor(NaiveTime::from_hms_milli_opt(0, 4, 1, 500).unwrap()), hms(0, 0, 0));
    }

    #[test]
    fn alignment() {
        let grid = SlotGrid::new(5).unwrap();
        assert!(grid.is_aligned(hms(6, 35, 0)));
        assert!(!grid.is_aligned(hms(6, 36, 0)));
        assert!(!grid.is_aligned(hms(6, 35, 10)));
    }
}
