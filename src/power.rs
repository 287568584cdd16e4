use embedded_hal::digital::OutputPin;
use embedded_io::{Read, ReadReady, Write};

use crate::client::Device;
use crate::clock::{ms, Clock};
use crate::config::ModemConfig;
use crate::module_timing::{
    power_off_time, pwr_key_lead_time, pwr_key_pulse_time, supply_settle_time,
};
use crate::transaction::WaitPolicy;

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// Hard power cycle through the control pins.
    ///
    /// Cuts external supply with PWRKEY held low, restores supply, lets it
    /// settle, then pulses PWRKEY low for the SIM800 power-on time. Pins the
    /// board does not wire up are simply skipped.
    pub(crate) fn power_cycle(&mut self) {
        if let Some(rst) = self.config.reset_pin() {
            rst.set_high().ok();
        }

        if let Some(ext) = self.config.ext_power_pin() {
            ext.set_low().ok();
        }
        if let Some(pwr) = self.config.power_key_pin() {
            pwr.set_low().ok();
        }
        self.delay(power_off_time()).ok();

        if let Some(ext) = self.config.ext_power_pin() {
            ext.set_high().ok();
        }
        self.delay(supply_settle_time()).ok();

        if let Some(pwr) = self.config.power_key_pin() {
            pwr.set_high().ok();
        }
        self.delay(pwr_key_lead_time()).ok();
        if let Some(pwr) = self.config.power_key_pin() {
            pwr.set_low().ok();
        }
        self.delay(pwr_key_pulse_time()).ok();
        if let Some(pwr) = self.config.power_key_pin() {
            pwr.set_high().ok();
        }
    }

    /// Probe the AT interface: up to three bare `AT` commands, each with a
    /// one second window.
    ///
    /// After many consecutive dead checks a busy modem is given the benefit
    /// of the doubt with a `+CIPSTATUS` query, since an open data session can
    /// starve the command channel without the modem being gone.
    pub(crate) fn check_at_alive(&mut self) -> bool {
        self.check_response(100, WaitPolicy::Drain);

        for _ in 0..3 {
            self.send_at("");
            if self.check_response(1_000, WaitPolicy::UntilOk) {
                return true;
            }
            self.delay(ms(100)).ok();
        }

        if self.counters.at_dead > 10 {
            self.counters.at_dead = 1;
            self.send_at("+CIPSTATUS");
            self.check_response(3_000, WaitPolicy::Drain);
            let busy = ["IP INITIAL", "IP START", "IP CONFIG", "IP GPRSACT"]
                .iter()
                .any(|s| self.rcv_buf.contains(s));
            if busy {
                info!("modem: command channel busy with data session");
                return true;
            }
        }

        false
    }
}
