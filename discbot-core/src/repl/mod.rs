//! Line console shared between firmware and emulator targets.
//!
//! [`grammar`] turns a line into a [`grammar::Command`], [`commands`] runs it
//! against a [`DiscBot`](crate::robot::DiscBot) and [`status`] renders the
//! read-only views.

pub mod commands;
pub mod grammar;
pub mod status;
