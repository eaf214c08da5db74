//! Database models split into domain-specific modules.

pub mod car;
pub mod common;
pub mod test_drive;
pub mod user;

pub use car::*;
pub use common::*;
pub use test_drive::*;
pub use user::*;
