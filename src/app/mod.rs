//! Application core: the controller service, its command surface,
//! outbound events, and the port traits at the hardware boundary.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
