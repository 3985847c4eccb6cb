//! Database models split into domain-specific modules.

pub mod appointment;
pub mod common;
pub mod fabric;
pub mod job;
pub mod measurement;
pub mod notification;
pub mod order;
pub mod stats;
pub mod style;
pub mod user;

pub use appointment::*;
pub use common::*;
pub use fabric::*;
pub use job::*;
pub use measurement::*;
pub use notification::*;
pub use order::*;
pub use stats::*;
pub use style::*;
pub use user::*;
