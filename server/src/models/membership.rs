use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Spend units per loyalty point.
pub const SPEND_PER_POINT: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Ruby,
}

/// Ascending lifetime-spend thresholds.
const TIERS: [(Tier, i64); 6] = [
    (Tier::Bronze, 0),
    (Tier::Silver, 2_000_000),
    (Tier::Gold, 7_000_000),
    (Tier::Platinum, 10_000_000),
    (Tier::Diamond, 15_000_000),
    (Tier::Ruby, 25_000_000),
];

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "Bronze",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Platinum => "Platinum",
            Tier::Diamond => "Diamond",
            Tier::Ruby => "Ruby",
        }
    }

    pub fn threshold(self) -> Decimal {
        TIERS
            .iter()
            .find(|(tier, _)| *tier == self)
            .map(|(_, min)| Decimal::from(*min))
            .unwrap_or_default()
    }

    /// Highest tier whose threshold is at or below `spent`.
    pub fn for_spent(spent: Decimal) -> Tier {
        TIERS
            .iter()
            .rev()
            .find(|(_, min)| spent >= Decimal::from(*min))
            .map(|(tier, _)| *tier)
            .unwrap_or(Tier::Bronze)
    }

    /// The next tier above `spent` and how much more spend it needs.
    pub fn next_after(spent: Decimal) -> Option<(Tier, Decimal)> {
        TIERS
            .iter()
            .find(|(_, min)| spent < Decimal::from(*min))
            .map(|(tier, min)| (*tier, Decimal::from(*min) - spent))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TIERS
            .iter()
            .map(|(tier, _)| *tier)
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tier '{s}'"))
    }
}

pub fn points_for(amount: Decimal) -> i64 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    (amount / Decimal::from(SPEND_PER_POINT))
        .floor()
        .to_i64()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub tier: Tier,
    pub points: i64,
    pub total_spent: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier: Tier::Bronze,
            points: 0,
            total_spent: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a ledger entry to the running totals. Tier is recomputed
    /// from `total_spent`, points never go negative.
    pub fn apply(&mut self, entry: &PointEntry, now: DateTime<Utc>) {
        self.total_spent = (self.total_spent + entry.spend_delta()).max(Decimal::ZERO);
        self.points = (self.points + entry.points_delta()).max(0);
        self.tier = Tier::for_spent(self.total_spent);
        self.updated_at = now;
    }

    pub fn summary(&self, earned: Option<i64>) -> MembershipSummary {
        let next = Tier::next_after(self.total_spent);
        MembershipSummary {
            user_id: self.user_id,
            tier: self.tier,
            points: self.points,
            total_spent: self.total_spent,
            next_tier: next.map(|(tier, _)| tier),
            needed_to_next_tier: next.map(|(_, need)| need).unwrap_or(Decimal::ZERO),
            earned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSummary {
    pub user_id: Uuid,
    pub tier: Tier,
    pub points: i64,
    pub total_spent: Decimal,
    pub next_tier: Option<Tier>,
    pub needed_to_next_tier: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointLogKind {
    Earn,
    Redeem,
    Adjust,
    Refund,
}

impl PointLogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PointLogKind::Earn => "earn",
            PointLogKind::Redeem => "redeem",
            PointLogKind::Adjust => "adjust",
            PointLogKind::Refund => "refund",
        }
    }

    /// Sign applied to a log row's `points` and `amount` when folding the ledger.
    /// `adjust` rows carry their own sign.
    pub fn sign(self) -> i64 {
        match self {
            PointLogKind::Earn | PointLogKind::Adjust => 1,
            PointLogKind::Redeem | PointLogKind::Refund => -1,
        }
    }
}

impl FromStr for PointLogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(PointLogKind::Earn),
            "redeem" => Ok(PointLogKind::Redeem),
            "adjust" => Ok(PointLogKind::Adjust),
            "refund" => Ok(PointLogKind::Refund),
            other => Err(format!("unknown point log kind '{other}'")),
        }
    }
}

/// A ledger entry about to be applied; `points` and `amount` are magnitudes
/// for earn/redeem/refund and signed for adjust.
#[derive(Debug, Clone)]
pub struct PointEntry {
    pub user_id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub kind: PointLogKind,
    pub points: i64,
    pub amount: Decimal,
    pub note: String,
    pub created_by: Option<Uuid>,
}

impl PointEntry {
    pub fn earn(user_id: Uuid, ticket_id: Uuid, amount: Decimal, created_by: Option<Uuid>) -> Self {
        Self {
            user_id,
            ticket_id: Some(ticket_id),
            kind: PointLogKind::Earn,
            points: points_for(amount),
            amount,
            note: "Earned points from ticket payment".to_string(),
            created_by,
        }
    }

    pub fn points_delta(&self) -> i64 {
        self.points * self.kind.sign()
    }

    pub fn spend_delta(&self) -> Decimal {
        self.amount * Decimal::from(self.kind.sign())
    }

    pub fn into_log(self, now: DateTime<Utc>) -> PointLog {
        PointLog {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            ticket_id: self.ticket_id,
            kind: self.kind,
            points: self.points,
            amount: self.amount,
            note: Some(self.note),
            created_by: self.created_by,
            created_at: now,
        }
    }
}

/// Append-only membership ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticket_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: PointLogKind,
    pub points: i64,
    pub amount: Decimal,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Per-user, per-kind sums over the ledger.
#[derive(Debug, Clone)]
pub struct PointLogSum {
    pub user_id: Uuid,
    pub kind: PointLogKind,
    pub points: i64,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(Tier::for_spent(d(0)), Tier::Bronze);
        assert_eq!(Tier::for_spent(d(1_999_999)), Tier::Bronze);
        assert_eq!(Tier::for_spent(d(2_000_000)), Tier::Silver);
        assert_eq!(Tier::for_spent(d(9_999_999)), Tier::Gold);
        assert_eq!(Tier::for_spent(d(15_000_000)), Tier::Diamond);
        assert_eq!(Tier::for_spent(d(90_000_000)), Tier::Ruby);
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(Tier::Bronze < Tier::Silver);
        assert!(Tier::Diamond < Tier::Ruby);
        assert_eq!(Tier::Gold.threshold(), d(7_000_000));
    }

    #[test]
    fn test_next_tier() {
        assert_eq!(Tier::next_after(d(1_500_000)), Some((Tier::Silver, d(500_000))));
        assert_eq!(Tier::next_after(d(25_000_000)), None);
    }

    #[test]
    fn test_points_floor() {
        assert_eq!(points_for(d(230_000)), 230);
        assert_eq!(points_for(d(999)), 0);
        assert_eq!(points_for(Decimal::new(1_999_5, 1)), 1);
        assert_eq!(points_for(d(-5_000)), 0);
    }

    #[test]
    fn test_apply_earn_updates_tier() {
        let user = Uuid::new_v4();
        let mut membership = Membership::new(user, Utc::now());
        let entry = PointEntry::earn(user, Uuid::new_v4(), d(2_100_000), None);
        membership.apply(&entry, Utc::now());
        assert_eq!(membership.points, 2_100);
        assert_eq!(membership.tier, Tier::Silver);

        let summary = membership.summary(Some(2_100));
        assert_eq!(summary.next_tier, Some(Tier::Gold));
        assert_eq!(summary.needed_to_next_tier, d(4_900_000));
    }

    #[test]
    fn test_redeem_never_goes_negative() {
        let user = Uuid::new_v4();
        let mut membership = Membership::new(user, Utc::now());
        let entry = PointEntry {
            user_id: user,
            ticket_id: None,
            kind: PointLogKind::Redeem,
            points: 50,
            amount: Decimal::ZERO,
            note: "redeem".into(),
            created_by: None,
        };
        membership.apply(&entry, Utc::now());
        assert_eq!(membership.points, 0);
    }
}
