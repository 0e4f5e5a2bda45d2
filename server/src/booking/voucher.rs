use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::catalog::{DiscountType, Promotion, UsageLimit};
use crate::models::ticket::VoucherSnapshot;
use crate::utils::error::{AppError, AppResult};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Codes are matched trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Discount for `subtotal`: percentage capped by `max_discount`, fixed capped
/// at the subtotal. Never negative, never above the subtotal, and kept to
/// two decimal places to match the stored money columns.
pub fn discount_amount(
    discount_type: DiscountType,
    value: Decimal,
    max_discount: Option<Decimal>,
    subtotal: Decimal,
) -> Decimal {
    let subtotal = subtotal.max(Decimal::ZERO);
    let raw = match discount_type {
        DiscountType::Percentage => {
            let pct = subtotal * value / HUNDRED;
            match max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::Fixed => value,
    };
    raw.max(Decimal::ZERO).min(subtotal).round_dp(2).normalize()
}

pub fn compute_discount(promotion: &Promotion, subtotal: Decimal) -> Decimal {
    discount_amount(
        promotion.discount_type,
        promotion.discount_value,
        promotion.max_discount,
        subtotal,
    )
}

/// Re-evaluates an attached voucher against a new subtotal. Below the
/// voucher's minimum order the voucher stays attached but grants nothing.
pub fn snapshot_discount(voucher: &VoucherSnapshot, subtotal: Decimal) -> Decimal {
    if voucher.min_order_value.is_some_and(|minimum| subtotal < minimum) {
        return Decimal::ZERO;
    }
    discount_amount(
        voucher.discount_type,
        voucher.discount_value,
        voucher.max_discount,
        subtotal,
    )
}

/// Checks minimum order and movie applicability. Single-use redemption is
/// enforced by the store when the voucher is attached.
pub fn check_eligibility(
    promotion: &Promotion,
    movie_id: Option<Uuid>,
    subtotal: Option<Decimal>,
) -> AppResult<()> {
    if let (Some(movie_id), false) = (movie_id, promotion.applicable_movies.is_empty()) {
        if !promotion.applicable_movies.contains(&movie_id) {
            return Err(AppError::ValidationError(format!(
                "Voucher {} is not valid for the selected movie",
                promotion.code
            )));
        }
    }
    if let (Some(subtotal), Some(minimum)) = (subtotal, promotion.min_order_value) {
        if subtotal < minimum {
            return Err(AppError::ValidationError(format!(
                "Voucher {} requires a minimum order of {}",
                promotion.code, minimum
            )));
        }
    }
    Ok(())
}

pub fn snapshot(promotion: &Promotion) -> VoucherSnapshot {
    VoucherSnapshot {
        code: promotion.code.clone(),
        discount_type: promotion.discount_type,
        discount_value: promotion.discount_value,
        max_discount: promotion.max_discount,
        min_order_value: promotion.min_order_value,
        single_use: promotion.usage_limit == UsageLimit::Single,
    }
}

/// Result of validating a code without attaching it to a ticket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherPreview {
    pub promotion: Promotion,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Sample basket used when the caller does not supply an amount.
pub const PREVIEW_SAMPLE_AMOUNT: i64 = 100_000;

pub fn preview(promotion: Promotion, amount: Option<Decimal>) -> VoucherPreview {
    let original_amount = amount.unwrap_or_else(|| Decimal::from(PREVIEW_SAMPLE_AMOUNT));
    let discount_amount = compute_discount(&promotion, original_amount);
    VoucherPreview {
        promotion,
        original_amount,
        discount_amount,
        final_amount: original_amount - discount_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn promo(discount_type: DiscountType, value: i64, cap: Option<i64>) -> Promotion {
        Promotion {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            name: "Save".into(),
            discount_type,
            discount_value: d(value),
            max_discount: cap.map(d),
            min_order_value: None,
            usage_limit: UsageLimit::Unlimited,
            applicable_movies: vec![],
            start_date: Utc::now() - Duration::days(1),
            end_date: Utc::now() + Duration::days(1),
            is_active: true,
        }
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let p = promo(DiscountType::Percentage, 10, Some(20_000));
        assert_eq!(compute_discount(&p, d(250_000)), d(20_000));
        assert_eq!(compute_discount(&p, d(100_000)), d(10_000));
    }

    #[test]
    fn test_fixed_never_exceeds_subtotal() {
        let p = promo(DiscountType::Fixed, 80_000, None);
        assert_eq!(compute_discount(&p, d(50_000)), d(50_000));
        assert_eq!(compute_discount(&p, d(200_000)), d(80_000));
    }

    #[test]
    fn test_oversized_percentage_bounded_by_subtotal() {
        let p = promo(DiscountType::Percentage, 150, None);
        assert_eq!(compute_discount(&p, d(40_000)), d(40_000));
    }

    #[test]
    fn test_code_normalization() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
    }

    #[test]
    fn test_minimum_order_and_movie_rules() {
        let movie = Uuid::new_v4();
        let mut p = promo(DiscountType::Fixed, 10_000, None);
        p.min_order_value = Some(d(100_000));
        p.applicable_movies = vec![movie];

        assert!(check_eligibility(&p, Some(movie), Some(d(120_000))).is_ok());
        assert!(check_eligibility(&p, Some(movie), Some(d(90_000))).is_err());
        assert!(check_eligibility(&p, Some(Uuid::new_v4()), Some(d(120_000))).is_err());
        assert!(check_eligibility(&p, None, None).is_ok());
    }

    #[test]
    fn test_preview_uses_sample_amount() {
        let preview = preview(promo(DiscountType::Percentage, 10, None), None);
        assert_eq!(preview.original_amount, d(100_000));
        assert_eq!(preview.discount_amount, d(10_000));
        assert_eq!(preview.final_amount, d(90_000));
    }

    #[test]
    fn test_snapshot_discount_tracks_subtotal() {
        let p = promo(DiscountType::Percentage, 10, Some(20_000));
        let snap = snapshot(&p);
        assert_eq!(snapshot_discount(&snap, d(150_000)), d(15_000));
        assert_eq!(snapshot_discount(&snap, d(300_000)), d(20_000));
    }

    #[test]
    fn test_snapshot_discount_drops_below_minimum_order() {
        let mut p = promo(DiscountType::Fixed, 30_000, None);
        p.min_order_value = Some(d(200_000));
        let snap = snapshot(&p);
        assert_eq!(snapshot_discount(&snap, d(200_000)), d(30_000));
        assert_eq!(snapshot_discount(&snap, d(199_999)), Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_marks_single_use() {
        let mut p = promo(DiscountType::Fixed, 1, None);
        p.usage_limit = UsageLimit::Single;
        assert!(snapshot(&p).single_use);
    }
}
