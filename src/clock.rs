use fugit::{TimerDurationU32, TimerInstantU32};

/// Host-provided timer with a monotonic now and a one-shot countdown.
///
/// `TIMER_HZ` is the tick rate of the underlying counter; all driver
/// intervals are expressed in milliseconds and converted through [`fugit`].
pub trait Clock<const TIMER_HZ: u32> {
    type Error: core::fmt::Debug;

    /// Current reading of the monotonic counter.
    fn now(&mut self) -> TimerInstantU32<TIMER_HZ>;

    /// Arm the countdown.
    fn start(&mut self, duration: TimerDurationU32<TIMER_HZ>) -> Result<(), Self::Error>;

    /// Non-blocking poll of the countdown armed by [`Clock::start`].
    fn wait(&mut self) -> nb::Result<(), Self::Error>;
}

/// Milliseconds as a timer duration.
pub(crate) fn ms<const TIMER_HZ: u32>(millis: u32) -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::millis(millis)
}

/// Duration from `since` to `now`, safe across counter wraparound.
///
/// Instant subtraction in `fugit` is only defined for ordered pairs; the
/// tick-level wrapping subtraction matches the unsigned `now - last`
/// comparisons the modem firmware timing model is built on.
pub(crate) fn elapsed<const TIMER_HZ: u32>(
    now: TimerInstantU32<TIMER_HZ>,
    since: TimerInstantU32<TIMER_HZ>,
) -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::from_ticks(now.ticks().wrapping_sub(since.ticks()))
}
