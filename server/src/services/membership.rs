use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::ServiceContext;
use crate::events::BookingEvent;
use crate::models::membership::{MembershipSummary, PointEntry, PointLog};
use crate::models::ticket::Ticket;
use crate::models::user::Actor;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::{Page, Paginated};

/// A membership whose running totals disagree with its ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipDrift {
    pub user_id: Uuid,
    pub recorded_points: i64,
    pub ledger_points: i64,
    pub recorded_spent: Decimal,
    pub ledger_spent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    pub drifted: Vec<MembershipDrift>,
}

pub struct MembershipService {
    ctx: Arc<ServiceContext>,
}

impl MembershipService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Credits a settled ticket to its owner.
    pub async fn upsert_after_payment(
        &self,
        ticket: &Ticket,
        created_by: Option<Uuid>,
    ) -> AppResult<MembershipSummary> {
        let entry = PointEntry::earn(ticket.user_id, ticket.id, ticket.total_amount, created_by);
        let earned = entry.points;
        let membership = self
            .ctx
            .store
            .apply_points(entry, self.ctx.clock.now())
            .await?;

        tracing::info!(
            user_id = %membership.user_id,
            ticket_id = %ticket.id,
            earned,
            tier = %membership.tier,
            "Membership points awarded"
        );
        let summary = membership.summary(Some(earned));
        self.ctx
            .events
            .publish(BookingEvent::MembershipUpdated(summary.clone()));
        Ok(summary)
    }

    /// Like [`upsert_after_payment`](Self::upsert_after_payment) but never
    /// fails the caller: the payment already stands.
    pub async fn award_for_ticket(&self, ticket: &Ticket, actor: &Actor) -> Option<MembershipSummary> {
        match self.upsert_after_payment(ticket, Some(actor.user_id)).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(ticket_id = %ticket.id, error = %e, "Failed to award membership points");
                None
            }
        }
    }

    pub async fn summary(&self, actor: &Actor, user_id: Uuid) -> AppResult<MembershipSummary> {
        ensure_self_or_staff(actor, user_id)?;
        let membership = self
            .ctx
            .store
            .ensure_membership(user_id, self.ctx.clock.now())
            .await?;
        Ok(membership.summary(None))
    }

    pub async fn history(
        &self,
        actor: &Actor,
        user_id: Uuid,
        page: Page,
    ) -> AppResult<Paginated<PointLog>> {
        ensure_self_or_staff(actor, user_id)?;
        let page = page.clamped();
        let (items, total) = self.ctx.store.point_logs(user_id, page).await?;
        Ok(Paginated::new(items, total, page))
    }

    /// Folds the ledger per user and compares it with the stored totals.
    /// Read-only; fixing drift is left to an operator.
    pub async fn reconcile(&self, actor: &Actor) -> AppResult<ReconcileReport> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden(
                "Only administrators can reconcile memberships".to_string(),
            ));
        }

        let mut ledger: HashMap<Uuid, (i64, Decimal)> = HashMap::new();
        for sum in self.ctx.store.point_log_sums().await? {
            let sign = sum.kind.sign();
            let entry = ledger.entry(sum.user_id).or_default();
            entry.0 += sum.points * sign;
            entry.1 += sum.amount * Decimal::from(sign);
        }

        let memberships = self.ctx.store.memberships().await?;
        let checked = memberships.len();
        let mut drifted = Vec::new();
        for membership in memberships {
            let (points, spent) = ledger
                .remove(&membership.user_id)
                .unwrap_or((0, Decimal::ZERO));
            if points != membership.points || spent != membership.total_spent {
                drifted.push(MembershipDrift {
                    user_id: membership.user_id,
                    recorded_points: membership.points,
                    ledger_points: points,
                    recorded_spent: membership.total_spent,
                    ledger_spent: spent,
                });
            }
        }
        // Ledger rows without a membership row at all.
        for (user_id, (points, spent)) in ledger {
            drifted.push(MembershipDrift {
                user_id,
                recorded_points: 0,
                ledger_points: points,
                recorded_spent: Decimal::ZERO,
                ledger_spent: spent,
            });
        }

        if !drifted.is_empty() {
            tracing::warn!(count = drifted.len(), "Membership drift detected");
        }
        Ok(ReconcileReport { checked, drifted })
    }
}

fn ensure_self_or_staff(actor: &Actor, user_id: Uuid) -> AppResult<()> {
    if actor.can_access(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You can only view your own membership".to_string(),
        ))
    }
}
