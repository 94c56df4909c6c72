//! Job action implementations.
//!
//! This module provides the actions job files can schedule. Today that is
//! running an external command.

mod command;

pub use command::{CommandAction, CommandActionBuilder};
