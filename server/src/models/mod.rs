pub mod catalog;
pub mod membership;
pub mod payment;
pub mod room;
pub mod schedule;
pub mod ticket;
pub mod user;
