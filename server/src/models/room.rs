use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatType {
    Standard,
    Vip,
}

/// A physical seat in a room layout.
///
/// `status` is informational only (e.g. "maintenance" painted on a seat map);
/// booking occupancy is always derived from live tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub code: String,
    #[serde(rename = "type")]
    pub seat_type: SeatType,
    pub row: String,
    pub column: i32,
    #[serde(default = "default_seat_status")]
    pub status: String,
}

fn default_seat_status() -> String {
    "available".to_string()
}

impl Seat {
    pub fn new(row: &str, column: i32, seat_type: SeatType) -> Self {
        Self {
            code: format!("{row}{column}"),
            seat_type,
            row: row.to_string(),
            column,
            status: default_seat_status(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub cinema_id: Uuid,
    pub name: String,
    pub seats: Vec<Seat>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn seat(&self, code: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.code == code)
    }
}

/// Builds a rectangular layout; rows listed in `vip_rows` get VIP seats.
pub fn grid_layout(rows: &[&str], columns: i32, vip_rows: &[&str]) -> Vec<Seat> {
    rows.iter()
        .flat_map(|row| {
            let seat_type = if vip_rows.contains(row) {
                SeatType::Vip
            } else {
                SeatType::Standard
            };
            (1..=columns).map(move |col| Seat::new(row, col, seat_type))
        })
        .collect()
}
