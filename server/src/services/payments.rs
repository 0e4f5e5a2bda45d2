use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MembershipService, ServiceContext};
use crate::booking::lifecycle::{ensure_status, Mutation};
use crate::models::membership::MembershipSummary;
use crate::models::payment::{
    BankInfo, IntentStatus, Payment, PaymentFilter, PaymentIntent,
};
use crate::models::ticket::{PaymentChannel, PaymentMethod, Ticket, TicketStatus};
use crate::models::user::Actor;
use crate::signing::{PaymentQr, QrPayload};
use crate::store::StoreError;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::{Page, Paginated};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub ticket_id: Uuid,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmQrRequest {
    #[serde(default)]
    pub intent_id: Option<Uuid>,
    #[serde(default)]
    pub ticket_id: Option<Uuid>,
    #[serde(default)]
    pub qr_content: Option<String>,
}

/// What a client needs to render and later confirm a payment QR.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentView {
    pub intent_id: Uuid,
    pub ticket_id: Uuid,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
    pub expires_at: DateTime<Utc>,
    pub qr_content: Option<String>,
    pub bank_info: Option<BankInfo>,
}

impl From<&PaymentIntent> for IntentView {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            intent_id: intent.id,
            ticket_id: intent.ticket_id,
            method: intent.method,
            amount: intent.amount,
            currency: intent.currency.clone(),
            status: intent.status,
            expires_at: intent.expires_at,
            qr_content: intent.qr_content(),
            bank_info: intent.bank_info.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub ticket: Ticket,
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<Uuid>,
    pub membership: Option<MembershipSummary>,
}

pub struct PaymentService {
    ctx: Arc<ServiceContext>,
    membership: Arc<MembershipService>,
}

impl PaymentService {
    pub fn new(ctx: Arc<ServiceContext>, membership: Arc<MembershipService>) -> Self {
        Self { ctx, membership }
    }

    /// Counter settlement by staff.
    pub async fn mark_paid(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        method: Option<PaymentMethod>,
    ) -> AppResult<Settlement> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden(
                "Only staff can mark tickets as paid".to_string(),
            ));
        }
        let ticket = self.ctx.load_ticket(ticket_id).await?;
        ensure_status(&ticket, Mutation::Settle)?;
        self.ensure_reservation_open(&ticket)?;

        let method = method.unwrap_or(ticket.payment.method);
        self.settle(actor, ticket, method, PaymentChannel::Counter, None)
            .await
    }

    /// Starts a payment. QR methods get a signed payload and bank details.
    pub async fn create_intent(
        &self,
        actor: &Actor,
        request: CreateIntentRequest,
    ) -> AppResult<PaymentIntent> {
        let ticket = self.ctx.load_ticket(request.ticket_id).await?;
        if !(actor.owns(ticket.user_id) || actor.is_admin()) {
            return Err(AppError::Forbidden(
                "You cannot start a payment for this ticket".to_string(),
            ));
        }
        ensure_status(&ticket, Mutation::CreateIntent)?;
        self.ensure_reservation_open(&ticket)?;
        if let Some(amount) = request.amount {
            if amount != ticket.total_amount {
                return Err(AppError::ValidationError(format!(
                    "Amount {} does not match the ticket total {}",
                    amount, ticket.total_amount
                )));
            }
        }

        self.issue_intent(&ticket, request.method.unwrap_or(PaymentMethod::Vietqr))
            .await
    }

    pub(crate) async fn issue_intent(
        &self,
        ticket: &Ticket,
        method: PaymentMethod,
    ) -> AppResult<PaymentIntent> {
        let now = self.ctx.clock.now();
        let expires_at = now + self.ctx.settings.intent_ttl;
        let currency = self.ctx.settings.currency.clone();

        let (qr_payload, signature, bank_info) = if method.uses_qr() {
            let payload = PaymentQr {
                kind: PaymentQr::KIND.to_string(),
                ver: self.ctx.signer.current_version(),
                intent_hint: "qr".to_string(),
                ticket_id: ticket.id,
                user_id: ticket.user_id,
                method,
                amount: ticket.total_amount,
                currency: currency.clone(),
                exp: expires_at.timestamp(),
            };
            let signed = self.ctx.signer.sign(&payload)?;
            if self.ctx.bank.is_none() {
                tracing::warn!(ticket_id = %ticket.id, "No bank account configured for QR payments");
            }
            (
                Some(signed.payload),
                Some(signed.signature),
                self.ctx.bank.clone(),
            )
        } else {
            (None, None, None)
        };

        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            method,
            amount: ticket.total_amount,
            currency,
            status: IntentStatus::Pending,
            expires_at,
            qr_payload,
            signature,
            bank_info,
            created_at: now,
        };
        self.ctx.store.insert_intent(&intent).await?;

        tracing::info!(
            intent_id = %intent.id,
            ticket_id = %ticket.id,
            method = method.as_str(),
            amount = %intent.amount,
            "Payment intent created"
        );
        Ok(intent)
    }

    /// Settles a ticket from a scanned payment QR or, for staff, a non-QR intent.
    pub async fn confirm_qr(&self, actor: &Actor, request: ConfirmQrRequest) -> AppResult<Settlement> {
        let intent = self.resolve_intent(&request).await?;
        if !actor.can_access(intent.user_id) {
            return Err(AppError::Forbidden(
                "You cannot confirm this payment".to_string(),
            ));
        }
        if intent.status != IntentStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Payment intent is already {}",
                intent.status.as_str()
            )));
        }
        if intent.is_expired(self.ctx.clock.now()) {
            self.ctx.store.expire_intent(intent.id).await?;
            tracing::info!(intent_id = %intent.id, "Payment intent expired at confirmation");
            return Err(AppError::Expired("Payment QR has expired".to_string()));
        }

        match intent.qr_content() {
            Some(expected) => {
                let content = request
                    .qr_content
                    .as_deref()
                    .ok_or_else(|| AppError::ValidationError("qrContent is required".to_string()))?;
                let (signed, payload) = self.ctx.signer.verify::<PaymentQr>(content)?;
                if signed.content() != expected
                    || payload.ticket_id != intent.ticket_id
                    || payload.amount != intent.amount
                {
                    return Err(AppError::Conflict(
                        "QR code does not match this payment".to_string(),
                    ));
                }
            }
            None if actor.is_staff() => {}
            None => {
                return Err(AppError::Forbidden(
                    "Only staff can confirm payments without a QR code".to_string(),
                ))
            }
        }

        let ticket = self.ctx.load_ticket(intent.ticket_id).await?;
        ensure_status(&ticket, Mutation::Settle)?;
        self.ensure_reservation_open(&ticket)?;
        if ticket.total_amount != intent.amount {
            return Err(AppError::Conflict(
                "Ticket total changed since the payment was started, create a new intent".to_string(),
            ));
        }

        self.settle(actor, ticket, intent.method, PaymentChannel::App, Some(intent.id))
            .await
    }

    async fn resolve_intent(&self, request: &ConfirmQrRequest) -> AppResult<PaymentIntent> {
        match (request.intent_id, request.ticket_id) {
            (Some(id), _) => self
                .ctx
                .store
                .intent(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Payment intent {id} not found"))),
            (None, Some(ticket_id)) => self
                .ctx
                .store
                .latest_pending_intent(ticket_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("No pending payment for ticket {ticket_id}"))
                }),
            (None, None) => Err(AppError::ValidationError(
                "intentId or ticketId is required".to_string(),
            )),
        }
    }

    fn ensure_reservation_open(&self, ticket: &Ticket) -> AppResult<()> {
        if ticket.reservation_lapsed(self.ctx.clock.now()) {
            return Err(AppError::Expired(
                "Seat reservation has expired, please book again".to_string(),
            ));
        }
        Ok(())
    }

    /// pending -> confirmed, payment row and intent consumption in one store
    /// write, then the membership award. Only the caller whose write lands
    /// gets here, so points are awarded once per ticket.
    async fn settle(
        &self,
        actor: &Actor,
        mut ticket: Ticket,
        method: PaymentMethod,
        channel: PaymentChannel,
        intent_id: Option<Uuid>,
    ) -> AppResult<Settlement> {
        let now = self.ctx.clock.now();
        ticket.confirm(method, channel, now)?;
        let payment = Payment::completed(
            ticket.id,
            ticket.user_id,
            ticket.total_amount,
            &self.ctx.settings.currency,
            method,
            now,
        );

        let (ticket, payment) = match self.ctx.store.settle(&ticket, &payment, intent_id).await {
            Ok(settled) => settled,
            Err(StoreError::StaleTicket(id)) => {
                let current = self.ctx.load_ticket(id).await?;
                return Err(if current.status == TicketStatus::Pending {
                    StoreError::StaleTicket(id).into()
                } else {
                    AppError::InvalidState(format!("Ticket is already {}", current.status))
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            ticket_id = %ticket.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            method = method.as_str(),
            "Ticket settled"
        );
        self.ctx.ticket_updated(&ticket);

        let membership = self.membership.award_for_ticket(&ticket, actor).await;
        Ok(Settlement {
            ticket,
            payment,
            intent_id,
            membership,
        })
    }

    pub async fn get_payment(&self, actor: &Actor, id: Uuid) -> AppResult<Payment> {
        let payment = self
            .ctx
            .store
            .payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {id} not found")))?;
        if !actor.can_access(payment.user_id) {
            return Err(AppError::Forbidden(
                "You do not have permission to view this payment".to_string(),
            ));
        }
        Ok(payment)
    }

    /// Staff see every payment; users only their own.
    pub async fn list_payments(
        &self,
        actor: &Actor,
        mut filter: PaymentFilter,
        page: Page,
    ) -> AppResult<Paginated<Payment>> {
        if !actor.is_staff() {
            filter.user_id = Some(actor.user_id);
        }
        let page = page.clamped();
        let (items, total) = self.ctx.store.list_payments(&filter, page).await?;
        Ok(Paginated::new(items, total, page))
    }
}
