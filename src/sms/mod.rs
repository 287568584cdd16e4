//! SMS receive and transmit pipelines.

mod rx;
mod tx;

use fugit::{TimerDurationU32, TimerInstantU32};
use heapless::String;

use crate::clock::{elapsed, ms};

pub const MAX_NUMBER_LEN: usize = 20;
pub const MAX_BODY_LEN: usize = 160;

const BACKOFF_FLOOR_MS: u32 = 2_000;
const BACKOFF_CEIL_MS: u32 = 60_000;
/// A queued message untouched for this long is considered stale.
const STALE_AFTER_MS: u32 = 10_000;
/// Consecutive failures after which the pending message is dropped.
pub(crate) const ABANDON_AFTER: u8 = 4;

/// A received text message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InboundMessage {
    pub sender: String<MAX_NUMBER_LEN>,
    pub body: String<MAX_BODY_LEN>,
}

#[derive(Debug, Clone)]
pub(crate) struct OutboundMessage {
    pub number: String<MAX_NUMBER_LEN>,
    pub body: String<MAX_BODY_LEN>,
}

/// Single-slot outbound queue with exponential retry backoff.
///
/// Loading always replaces the slot, newest message wins. The backoff delay
/// doubles on every failed attempt and resets to the floor on success or
/// abandonment.
pub(crate) struct TxQueue<const TIMER_HZ: u32> {
    slot: Option<OutboundMessage>,
    pub last_attempt: TimerInstantU32<TIMER_HZ>,
    pub backoff: TimerDurationU32<TIMER_HZ>,
}

impl<const TIMER_HZ: u32> TxQueue<TIMER_HZ> {
    pub fn new() -> Self {
        Self {
            slot: None,
            last_attempt: TimerInstantU32::from_ticks(0),
            backoff: ms(BACKOFF_FLOOR_MS),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.is_some()
    }

    pub fn pending(&self) -> Option<&OutboundMessage> {
        self.slot.as_ref()
    }

    /// A loaded message whose last attempt lies further back than the stale
    /// threshold. Means the driver spent that time somewhere else, likely
    /// with the transport in an unknown condition.
    pub fn is_stale(&self, now: TimerInstantU32<TIMER_HZ>) -> bool {
        self.slot.is_some() && elapsed(now, self.last_attempt) > ms::<TIMER_HZ>(STALE_AFTER_MS)
    }

    /// Load a message, truncating number and body to capacity. Resets the
    /// attempt stamp so the message is due immediately.
    pub fn load(&mut self, number: &str, body: &str) {
        self.slot = Some(OutboundMessage {
            number: truncated(number),
            body: truncated(body),
        });
        self.last_attempt = TimerInstantU32::from_ticks(0);
    }

    /// Backoff has elapsed since the last attempt and a message is loaded.
    pub fn due(&self, now: TimerInstantU32<TIMER_HZ>) -> bool {
        self.slot.is_some() && elapsed(now, self.last_attempt) > self.backoff
    }

    pub fn clear(&mut self) {
        self.slot = None;
        self.backoff = ms(BACKOFF_FLOOR_MS);
    }

    pub fn double_backoff(&mut self) {
        self.backoff = core::cmp::min(self.backoff * 2, ms(BACKOFF_CEIL_MS));
    }

    pub fn reset_backoff(&mut self) {
        self.backoff = ms(BACKOFF_FLOOR_MS);
    }
}

/// Copy at most `N` bytes worth of characters out of `s`.
pub(crate) fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
