//! ## Status display
//!
//! Write-only sink for what the dispatcher wants a human to see. The core pushes
//! notifications here and never reads anything back.

use std::net::IpAddr;

use crate::backup::Role;
use crate::print;

pub trait StatusDisplay: Send + Sync {
    /// A human readable event line ("Order dispatched", "Elevator disconnected", ...)
    fn event(&self, text: &str);

    /// Number of connected elevators changed
    fn elevator_count(&self, count: usize);

    /// This process switched role
    fn mode(&self, role: Role);

    /// Where elevators can reach this dispatcher
    fn address(&self, ip: IpAddr, port: u16);
}

/// Shows everything on the terminal through [crate::print].
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalDisplay;

impl StatusDisplay for TerminalDisplay {
    fn event(&self, text: &str) {
        print::dispatch(text.to_string());
    }

    fn elevator_count(&self, count: usize) {
        print::info(format!("Elevators connected: {}", count));
    }

    fn mode(&self, role: Role) {
        print::ok(format!("Running as {}", role));
    }

    fn address(&self, ip: IpAddr, port: u16) {
        print::ok(format!("Listening for elevators on {}:{}", ip, port));
    }
}
