//! Booking use cases. Each service owns one slice of the workflow and talks
//! to storage only through [`BookingStore`].

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BookingSettings;
use crate::events::{BookingEvent, EventBus};
use crate::models::payment::BankInfo;
use crate::models::room::Room;
use crate::models::schedule::Schedule;
use crate::models::ticket::Ticket;
use crate::signing::QrSigner;
use crate::store::BookingStore;
use crate::utils::error::{AppError, AppResult};

pub mod checkin;
pub mod membership;
pub mod payments;
pub mod schedules;
pub mod tickets;

pub use checkin::CheckInService;
pub use membership::MembershipService;
pub use payments::PaymentService;
pub use schedules::ScheduleService;
pub use tickets::TicketService;

/// Dependencies shared by every service.
pub struct ServiceContext {
    pub store: Arc<dyn BookingStore>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
    pub signer: QrSigner,
    pub settings: BookingSettings,
    pub bank: Option<BankInfo>,
}

impl ServiceContext {
    pub async fn load_ticket(&self, id: Uuid) -> AppResult<Ticket> {
        self.store
            .ticket(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {id} not found")))
    }

    pub async fn load_schedule(&self, id: Uuid) -> AppResult<Schedule> {
        self.store
            .schedule(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {id} not found")))
    }

    pub async fn load_room(&self, id: Uuid) -> AppResult<Room> {
        self.store
            .room(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {id} not found")))
    }

    pub fn ticket_updated(&self, ticket: &Ticket) {
        self.events.publish(BookingEvent::TicketUpdated {
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            status: ticket.status,
            payment_status: ticket.payment_status,
        });
    }
}

/// All services wired over one context.
#[derive(Clone)]
pub struct Services {
    pub schedules: Arc<ScheduleService>,
    pub tickets: Arc<TicketService>,
    pub payments: Arc<PaymentService>,
    pub check_in: Arc<CheckInService>,
    pub membership: Arc<MembershipService>,
}

impl Services {
    pub fn new(ctx: ServiceContext) -> Self {
        let ctx = Arc::new(ctx);
        let membership = Arc::new(MembershipService::new(ctx.clone()));
        let payments = Arc::new(PaymentService::new(ctx.clone(), membership.clone()));
        Self {
            schedules: Arc::new(ScheduleService::new(ctx.clone())),
            tickets: Arc::new(TicketService::new(ctx.clone(), payments.clone())),
            check_in: Arc::new(CheckInService::new(ctx)),
            payments,
            membership,
        }
    }
}
