//! Line-item pricing for seats and combos, and the ticket charge identity
//! `total = subtotal - discount + tax + service_fee`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::catalog::Combo;
use crate::models::room::{Room, SeatType};
use crate::models::schedule::{PriceTable, Schedule};
use crate::models::ticket::{ComboLine, SeatLine};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Charges {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
}

impl Charges {
    /// Discount is clamped into `[0, subtotal]`, so the total can never go
    /// negative while tax and fees are non-negative.
    pub fn new(subtotal: Decimal, discount: Decimal, tax: Decimal, service_fee: Decimal) -> Self {
        let subtotal = subtotal.max(Decimal::ZERO);
        let discount = discount.max(Decimal::ZERO).min(subtotal);
        let tax = tax.max(Decimal::ZERO);
        let service_fee = service_fee.max(Decimal::ZERO);
        Self {
            subtotal,
            discount,
            tax,
            service_fee,
            total: subtotal - discount + tax + service_fee,
        }
    }

    pub fn from_subtotal(subtotal: Decimal) -> Self {
        Self::new(subtotal, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    }

    pub fn with_subtotal(self, subtotal: Decimal) -> Self {
        Self::new(subtotal, self.discount, self.tax, self.service_fee)
    }

    pub fn with_discount(self, discount: Decimal) -> Self {
        Self::new(self.subtotal, discount, self.tax, self.service_fee)
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal - self.discount + self.tax + self.service_fee
            && self.total >= Decimal::ZERO
    }
}

/// Per-seat price from the schedule's price table.
///
/// The early-bird discount applies to bookings made strictly before the
/// early-bird end time.
pub fn seat_price(table: &PriceTable, seat_type: SeatType, booked_at: DateTime<Utc>) -> Decimal {
    let base = match seat_type {
        SeatType::Vip => table.vip,
        SeatType::Standard => table.standard,
    };
    match (table.early_bird_discount, table.early_bird_end_time) {
        (Some(discount), Some(until)) if booked_at < until => (base - discount).max(Decimal::ZERO),
        _ => base,
    }
}

/// Validates a seat selection against the room layout and snapshots prices.
///
/// Rejects empty selections, duplicated codes, and codes that do not exist
/// in the room.
pub fn price_seats(
    room: &Room,
    schedule: &Schedule,
    codes: &[String],
    booked_at: DateTime<Utc>,
) -> AppResult<Vec<SeatLine>> {
    if codes.is_empty() {
        return Err(AppError::ValidationError(
            "At least one seat must be selected".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = codes
        .iter()
        .filter(|code| !seen.insert(code.as_str()))
        .map(String::as_str)
        .collect();
    if !duplicates.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Duplicate seats in selection: {}",
            duplicates.join(", ")
        )));
    }

    let unknown: Vec<&str> = codes
        .iter()
        .filter(|code| room.seat(code).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Invalid seats for this room: {}",
            unknown.join(", ")
        )));
    }

    Ok(codes
        .iter()
        .filter_map(|code| room.seat(code))
        .map(|seat| SeatLine {
            code: seat.code.clone(),
            seat_type: seat.seat_type,
            price: seat_price(&schedule.price_table, seat.seat_type, booked_at),
            row: seat.row.clone(),
            column: seat.column,
        })
        .collect())
}

/// Carries the booked price over for seats a ticket already holds, so a
/// seat change only prices the newly added seats at today's rates.
pub fn keep_booked_prices(booked: &[SeatLine], lines: Vec<SeatLine>) -> Vec<SeatLine> {
    lines
        .into_iter()
        .map(|line| {
            booked
                .iter()
                .find(|kept| kept.code == line.code)
                .cloned()
                .unwrap_or(line)
        })
        .collect()
}

/// Largest quantity a single combo line may carry.
pub const MAX_COMBO_QUANTITY: u32 = 20;

fn check_combo_quantity(quantity: u32) -> AppResult<()> {
    if quantity == 0 {
        return Err(AppError::ValidationError(
            "Combo quantity must be at least 1".to_string(),
        ));
    }
    if quantity > MAX_COMBO_QUANTITY {
        return Err(AppError::ValidationError(format!(
            "Combo quantity cannot exceed {MAX_COMBO_QUANTITY}"
        )));
    }
    Ok(())
}

/// Snapshots a catalog combo into a ticket line. Prices always come from
/// the catalog, never from the client.
pub fn combo_line(combo: &Combo, quantity: u32) -> AppResult<ComboLine> {
    check_combo_quantity(quantity)?;
    if !combo.is_active {
        return Err(AppError::ValidationError(format!(
            "Combo '{}' is not currently available",
            combo.name
        )));
    }
    Ok(ComboLine {
        combo_id: combo.id,
        name: combo.name.clone(),
        quantity,
        price: combo.price,
    })
}

/// Adds `line` to `lines`, merging quantities when the combo is already
/// present. The merged quantity is held to the same cap as a single line.
pub fn merge_combo(lines: &mut Vec<ComboLine>, line: ComboLine) -> AppResult<()> {
    match lines.iter_mut().find(|l| l.combo_id == line.combo_id) {
        Some(existing) => {
            let quantity = existing
                .quantity
                .checked_add(line.quantity)
                .ok_or_else(|| {
                    AppError::ValidationError("Combo quantity is too large".to_string())
                })?;
            check_combo_quantity(quantity)?;
            existing.quantity = quantity;
        }
        None => {
            check_combo_quantity(line.quantity)?;
            lines.push(line);
        }
    }
    Ok(())
}

pub fn subtotal(seats: &[SeatLine], combos: &[ComboLine]) -> Decimal {
    seats.iter().map(|s| s.price).sum::<Decimal>()
        + combos.iter().map(ComboLine::line_total).sum::<Decimal>()
}
