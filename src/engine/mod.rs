//! Background and domain logic that is not tied to a single HTTP handler:
//! appointment slot booking, the delayed-notification schedule and the job
//! runner that executes it.

pub mod booking;
mod job_runner;
pub mod scheduler;

pub use booking::{check_availability, find_conflict, insert_if_free, move_if_free, parse_slot, BookingError, Slot};
pub use job_runner::*;
pub use scheduler::{
    cancel_appointment_jobs, cancel_order_jobs, enqueue_email, expected_delivery, plan_appointment_reminders,
    plan_order_jobs, reschedule_all, schedule_appointment_reminders, schedule_order_jobs, RescheduleStats,
};
