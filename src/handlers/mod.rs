//! Presentation-layer handlers.

pub mod command_handlers;
