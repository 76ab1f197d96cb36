//! Domain model module declarations.

pub mod exit;
pub mod notification;
pub mod session;
