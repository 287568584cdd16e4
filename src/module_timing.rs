use crate::clock::ms;
use fugit::TimerDurationU32;

/// Hold time with all supply rails off at the start of a power-cycle.
pub fn power_off_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    ms(1_000)
}

/// Settle time after the external supply rail is switched back on.
pub fn supply_settle_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    ms(500)
}

/// High time of `PWRKEY` before the power-on pulse.
pub fn pwr_key_lead_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    ms(100)
}

/// Low time of `PWRKEY` to trigger module switch on.
///
/// The SIM800 manual asks for > 1 second; a small margin is added.
pub fn pwr_key_pulse_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    ms(1_200)
}
