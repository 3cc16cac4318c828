#![no_std]

// Shared logic for the DiscBot controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library; hardware is reached only through the traits in
// `motion`, `storage`, `color`, `range`, `rfid`, `tune` and `lights`.

mod diag;

pub mod button;
pub mod color;
pub mod lights;
pub mod motion;
pub mod range;
pub mod repl;
pub mod rfid;
pub mod robot;
pub mod storage;
pub mod telemetry;
pub mod timebase;
pub mod tune;
