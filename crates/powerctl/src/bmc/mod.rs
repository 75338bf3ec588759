//! Out-of-band management interface.
//!
//! The power controller only needs three operations: open a session, read
//! the chassis power state, and switch it. [`IpmiTool`] does this with the
//! `ipmitool` binary; [`InMemoryBmc`] simulates controllers in memory.
//!
//! ## Requirements
//!
//! - `ipmitool` on `PATH` (or an explicit path) for real hardware
//! - IPMI-over-LAN (`lanplus`) enabled on each controller

mod ipmitool;
mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::error::BmcError;
use crate::host::HostDescriptor;

pub use ipmitool::IpmiTool;
pub use memory::{InMemoryBmc, SimulatedHost};

/// Chassis power command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    /// Power the chassis up.
    Up,
    /// Power the chassis down.
    Down,
}

impl PowerCommand {
    /// Command that drives the chassis to `on`.
    #[must_use]
    pub const fn towards(on: bool) -> Self {
        if on {
            Self::Up
        } else {
            Self::Down
        }
    }
}

impl fmt::Display for PowerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "power up"),
            Self::Down => write!(f, "power down"),
        }
    }
}

/// Opens management sessions.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Open an authenticated session to the controller described by `host`.
    async fn open(
        &self,
        host: &HostDescriptor,
        debug: bool,
    ) -> Result<Box<dyn PowerSession>, BmcError>;
}

/// An open management session.
#[async_trait]
pub trait PowerSession: Send + Sync {
    /// Whether the chassis is powered on.
    async fn chassis_power(&self) -> Result<bool, BmcError>;

    /// Issue a chassis power command.
    async fn set_chassis_power(&self, command: PowerCommand) -> Result<(), BmcError>;
}
