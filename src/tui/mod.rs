//! Terminal dashboard for the Mic-1 emulator.
//!
//! Provides an interactive terminal front end with:
//! - Live register, flag and bus staging view
//! - Microcode listing with breakpoints
//! - Memory view (hex or decimal) with symbol navigation
//! - Serial transcript and keyboard input to the receiver

mod app;
mod ui;

pub use app::{run_dashboard, DashboardApp, Pane};
