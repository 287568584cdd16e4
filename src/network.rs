use embedded_io::{Read, ReadReady, Write};

use crate::client::Device;
use crate::clock::Clock;
use crate::config::ModemConfig;
use crate::parser;
use crate::transaction::WaitPolicy;

/// GSM registration status, `+CREG` second parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationStatus {
    /// Status could not be parsed from the response.
    None,
    NotRegistering,
    RegisteredHomeNetwork,
    Searching,
    RegistrationDenied,
    Unknown,
    RegisteredRoaming,
}

impl RegistrationStatus {
    /// Home or roaming registration, i.e. the network is usable.
    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            RegistrationStatus::RegisteredHomeNetwork | RegistrationStatus::RegisteredRoaming
        )
    }
}

impl From<i32> for RegistrationStatus {
    fn from(v: i32) -> Self {
        match v {
            0 => RegistrationStatus::NotRegistering,
            1 => RegistrationStatus::RegisteredHomeNetwork,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::RegistrationDenied,
            4 => RegistrationStatus::Unknown,
            5 => RegistrationStatus::RegisteredRoaming,
            _ => RegistrationStatus::None,
        }
    }
}

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// `AT+CREG?`, true when registered on home network or roaming.
    pub(crate) fn check_registration(&mut self) -> bool {
        self.run_transaction("+CREG?", 1_000, WaitPolicy::UntilOk);
        let status =
            RegistrationStatus::from(parser::extract_param(&self.rcv_buf, "+CREG:", 2));
        debug!("modem: registration {:?}", status);
        status.is_registered()
    }

    /// `AT+CSQ` RSSI, normalized so 0 means no signal or unknown.
    pub(crate) fn read_signal_strength(&mut self) -> u8 {
        self.run_transaction("+CSQ", 1_000, WaitPolicy::UntilOk);
        let rssi = parser::extract_param(&self.rcv_buf, "+CSQ:", 1);
        debug!("modem: rssi {}", rssi);
        if (0..=31).contains(&rssi) {
            rssi as u8
        } else {
            0
        }
    }
}
