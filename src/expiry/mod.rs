//! Reservation expiry: deadline policy and the background scheduler

pub mod policy;
pub mod scheduler;

pub use policy::ExpiryPolicy;
pub use scheduler::{ExpiryScheduler, SchedulerHandle, SchedulerState};
