//! Pure booking rules: pricing, availability, voucher eligibility and the
//! ticket lifecycle guards. Nothing here touches storage.

pub mod availability;
pub mod lifecycle;
pub mod pricing;
pub mod voucher;
