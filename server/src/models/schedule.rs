use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cleaning and ads buffer appended to the movie runtime.
pub const SCHEDULE_BUFFER_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTable {
    pub standard: Decimal,
    pub vip: Decimal,
    #[serde(default)]
    pub early_bird_discount: Option<Decimal>,
    #[serde(default)]
    pub early_bird_end_time: Option<DateTime<Utc>>,
}

impl PriceTable {
    pub fn flat(standard: Decimal, vip: Decimal) -> Self {
        Self {
            standard,
            vip,
            early_bird_discount: None,
            early_bird_end_time: None,
        }
    }
}

/// A single screening of a movie in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub room_id: Uuid,
    pub cinema_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price_table: PriceTable,
    pub is_3d: bool,
    pub has_subtitles: bool,
    pub is_dubbed: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Half-open `[start, end)` interval overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub movie_id: Uuid,
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub price_table: PriceTable,
    #[serde(default)]
    pub is_3d: bool,
    #[serde(default)]
    pub has_subtitles: bool,
    #[serde(default)]
    pub is_dubbed: bool,
}

pub fn default_end_time(start: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
    start + Duration::minutes(i64::from(duration_minutes) + SCHEDULE_BUFFER_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(start_hour: u32, end_hour: u32) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            movie_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            cinema_id: Uuid::new_v4(),
            start_time: Utc.with_ymd_and_hms(2026, 1, 1, start_hour, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 1, 1, end_hour, 0, 0).unwrap(),
            price_table: PriceTable::flat(Decimal::from(100_000), Decimal::from(150_000)),
            is_3d: false,
            has_subtitles: true,
            is_dubbed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_overlap_is_half_open() {
        let s = schedule(10, 12);
        let at = |h| Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).unwrap();
        assert!(s.overlaps(at(11), at(13)));
        assert!(s.overlaps(at(9), at(11)));
        assert!(!s.overlaps(at(12), at(14)));
        assert!(!s.overlaps(at(8), at(10)));
    }

    #[test]
    fn test_default_end_time_adds_buffer() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 18, 0, 0).unwrap();
        let end = default_end_time(start, 120);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 20, 30, 0).unwrap());
    }
}
