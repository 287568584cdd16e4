use embedded_hal::digital::{ErrorType, OutputPin};

/// Placeholder for an absent control line.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Compile-time configuration surface of the driver.
///
/// Associated consts carry the polling intervals and escalation ceilings;
/// the defaults are the values the supervision logic was tuned with. Pin
/// accessors return `None` for lines that are not wired (only the PWRKEY
/// line is required for a full power-cycle; reset and external power rails
/// are optional).
pub trait ModemConfig {
    type ResetPin: OutputPin;
    type PowerKeyPin: OutputPin;
    type ExtPowerPin: OutputPin;

    /// Regular receive-poll period.
    const SMS_CHECK_INTERVAL_MS: u32 = 60_000;
    /// Signal re-check period in the `Ready` state.
    const NETWORK_HEALTH_CHECK_MS: u32 = 120_000;
    /// Max tolerated unhealthy duration before a forced reset.
    const NETWORK_RESET_TIMEOUT_MS: u32 = 900_000;
    /// Settle time after a power-cycle before probing the modem.
    const MODEM_RESET_WAIT_MS: u32 = 7_000;
    /// Preventive full-reset period while stuck in `Resetting`.
    const MODEM_REGULAR_RESET_MS: u32 = 30_000;

    /// Dead AT-interface checks tolerated before a reset.
    const MAX_AT_RETRIES: u8 = 10;
    /// Failed registration checks tolerated before a reset.
    const MAX_NETWORK_RETRIES: u8 = 30;
    /// Upper bound on messages drained per regular poll.
    const MAX_SMS_CHECK_PER_CYCLE: u8 = 3;
    /// Consecutive transmit failures before forcing a reset.
    const MAX_TX_FAILURES: u8 = 10;

    /// Access point name used when bringing up a bearer.
    const APN: &'static str = "internet";

    fn reset_pin(&mut self) -> Option<&mut Self::ResetPin>;
    fn power_key_pin(&mut self) -> Option<&mut Self::PowerKeyPin>;
    fn ext_power_pin(&mut self) -> Option<&mut Self::ExtPowerPin>;
}
