#![cfg_attr(not(test), no_std)]

//! # SIM800 supervisor
//!
//! Supervised driver for SIMCom SIM800 series GSM modems, talking the plain
//! text AT command protocol over a half-duplex serial link. The driver is a
//! cooperative state machine: the host calls [`Device::tick`] in its main
//! loop and the driver walks the modem through reset, SIM, network and
//! initialization checks until it reaches `Ready`, recovering from lock-ups
//! and coverage loss on its own. Inbound SMS are drained and exposed through
//! a one-message mailbox; outbound SMS go through a single-slot queue with
//! exponential backoff and post-hoc delivery verification.
//!
//! The physical transport is not owned by this crate: anything implementing
//! the blocking [`embedded_io`] `Read + ReadReady + Write` traits works, and
//! a `&mut` reference to a serial port satisfies the bounds, keeping the
//! port borrowed. Timekeeping comes from a host-implemented [`Clock`]:
//!
//! ```ignore
//! pub struct SysTimer<const TIMER_HZ: u32> {
//!     start: std::time::Instant,
//!     duration: fugit::TimerDurationU32<TIMER_HZ>,
//! }
//!
//! impl<const TIMER_HZ: u32> Clock<TIMER_HZ> for SysTimer<TIMER_HZ> {
//!     type Error = std::convert::Infallible;
//!
//!     fn now(&mut self) -> fugit::TimerInstantU32<TIMER_HZ> {
//!         fugit::TimerInstantU32::from_ticks(self.start.elapsed().as_millis() as u32)
//!     }
//!
//!     fn start(&mut self, duration: fugit::TimerDurationU32<TIMER_HZ>) -> Result<(), Self::Error> {
//!         self.start = std::time::Instant::now();
//!         self.duration = duration;
//!         Ok(())
//!     }
//!
//!     fn wait(&mut self) -> nb::Result<(), Self::Error> {
//!         if std::time::Instant::now() - self.start
//!             > std::time::Duration::from_millis(self.duration.ticks() as u64)
//!         {
//!             Ok(())
//!         } else {
//!             Err(nb::Error::WouldBlock)
//!         }
//!     }
//! }
//! ```

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

#[cfg(any(feature = "bearer-tcp", feature = "bearer-udp"))]
mod bearer;
mod client;
mod clock;
mod config;
pub mod error;
mod module_timing;
mod network;
mod parser;
mod power;
mod sms;
mod state;
mod transaction;

#[cfg(test)]
mod test_helpers;

pub use client::Device;
pub use clock::Clock;
pub use config::{ModemConfig, NoPin};
pub use network::RegistrationStatus;
pub use sms::InboundMessage;
pub use state::ModemState;

// Re-export fugit, since `Clock` is expressed in its units.
pub use fugit;

/// Prelude - Include traits
pub mod prelude {
    pub use super::clock::Clock;
    pub use super::config::ModemConfig;
}
