//! Single-connection TCP/UDP bearer over the modem's `CIP` command set.

use core::fmt::Write as _;

use embedded_io::{Read, ReadReady, Write};
use heapless::Vec;

use crate::client::Device;
use crate::clock::{elapsed, ms, Clock};
use crate::config::ModemConfig;
use crate::error::Error;
use crate::transaction::{WaitPolicy, CTRL_Z};

/// Bearer receive buffer size.
pub const BEARER_RX_LEN: usize = 512;

fn contains_token(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// Open a single TCP connection over the configured APN.
    #[cfg(feature = "bearer-tcp")]
    pub fn start_tcp_session(&mut self, host: &str, port: u16) -> bool {
        match self.open_session("TCP", host, port) {
            Ok(()) => true,
            Err(e) => {
                warn!("modem: tcp session failed ({:?})", e);
                false
            }
        }
    }

    /// Open a single UDP association over the configured APN.
    #[cfg(feature = "bearer-udp")]
    pub fn start_udp_session(&mut self, host: &str, port: u16) -> bool {
        match self.open_session("UDP", host, port) {
            Ok(()) => true,
            Err(e) => {
                warn!("modem: udp session failed ({:?})", e);
                false
            }
        }
    }

    /// Shared bring-up: shut any previous context, attach to GPRS with the
    /// configured APN, confirm an IP address, then connect.
    fn open_session(&mut self, mode: &str, host: &str, port: u16) -> Result<(), Error> {
        self.run_transaction("+CIPSHUT", 5_000, WaitPolicy::UntilOk);

        if !self.run_transaction("+CIPMUX=0", 1_000, WaitPolicy::UntilOk) {
            return Err(Error::ErrorResponse);
        }

        let mut cmd: heapless::String<128> = heapless::String::new();
        let _ = write!(cmd, "+CSTT=\"{}\",\"\",\"\"", CFG::APN);
        if !self.run_transaction(&cmd, 1_000, WaitPolicy::UntilOk) {
            return Err(Error::ErrorResponse);
        }

        if !self.run_transaction("+CIICR", 10_000, WaitPolicy::UntilOk) {
            return Err(Error::ErrorResponse);
        }

        // CIFSR answers with a bare address and no OK; a dot in the
        // response is taken as evidence of one.
        self.run_transaction("+CIFSR", 2_000, WaitPolicy::Drain);
        if !self.rcv_buf.contains('.') {
            return Err(Error::NoIp);
        }
        debug!("modem: bearer up, local address {}", self.rcv_buf.trim());

        cmd.clear();
        let _ = write!(cmd, "+CIPSTART=\"{}\",\"{}\",{}", mode, host, port);
        self.send_at(&cmd);
        self.check_response(1_000, WaitPolicy::UntilOk);
        // Slow networks deliver CONNECT OK well after the initial OK, and
        // the token can land split across reads, so keep accumulating into
        // the same buffer instead of starting a fresh transaction.
        let connected = self.rcv_buf.contains("CONNECT OK")
            || self.wait_for_token("CONNECT OK", 10_000);

        if connected {
            info!("modem: {} session to {}:{} open", mode, host, port);
            Ok(())
        } else {
            Err(Error::ConnectFailed)
        }
    }

    /// Send a payload on the open session.
    pub fn send_bytes(&mut self, data: &[u8]) -> bool {
        match self.send_on_session(data) {
            Ok(()) => true,
            Err(e) => {
                warn!("modem: bearer send failed ({:?})", e);
                false
            }
        }
    }

    fn send_on_session(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_at("+CIPSEND");
        self.check_response(5_000, WaitPolicy::UntilOk);
        if !self.rcv_buf.contains('>') {
            return Err(Error::Prompt);
        }

        self.write_raw(data);
        self.write_raw(&[CTRL_Z]);

        self.check_response(10_000, WaitPolicy::UntilOk);
        if self.rcv_buf.contains("SEND OK") {
            Ok(())
        } else {
            Err(Error::Unconfirmed)
        }
    }

    /// Poll for inbound session data for up to `wait_ms`.
    ///
    /// Data arrives unsolicited as `+IPD,<len>:<payload>`. Once the header
    /// shows up, a short fixed slurp collects the rest of the datagram. The
    /// returned buffer is raw, header included.
    pub fn receive_bytes(&mut self, wait_ms: u32) -> Vec<u8, BEARER_RX_LEN> {
        let mut data: Vec<u8, BEARER_RX_LEN> = Vec::new();
        let start = self.clock.now();

        while elapsed(self.clock.now(), start) < ms::<TIMER_HZ>(wait_ms) {
            self.slurp_into(&mut data);
            if contains_token(&data, b"+IPD,") {
                if self.delay(ms(500)).is_err() {
                    break;
                }
                self.slurp_into(&mut data);
                break;
            }
            if self.delay(ms(10)).is_err() {
                break;
            }
        }

        data
    }

    fn slurp_into(&mut self, data: &mut Vec<u8, BEARER_RX_LEN>) {
        let mut byte = [0u8; 1];
        while matches!(self.serial.read_ready(), Ok(true)) {
            match self.serial.read(&mut byte) {
                Ok(n) if n > 0 => {
                    if data.push(byte[0]).is_err() {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Close the connection and deactivate the GPRS context.
    pub fn close_session(&mut self) -> bool {
        self.run_transaction("+CIPCLOSE", 5_000, WaitPolicy::UntilOk);
        self.run_transaction("+CIPSHUT", 5_000, WaitPolicy::UntilOk);
        self.rcv_buf.contains("SHUT OK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_device;

    #[cfg(feature = "bearer-tcp")]
    #[test]
    fn tcp_session_bring_up() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CIFSR", "\r\n10.20.30.40\r\n");
        dev.serial
            .expect("+CIPSTART=\"TCP\",\"example.com\",8080", "\r\nOK\r\n\r\nCONNECT OK\r\n");

        assert!(dev.start_tcp_session("example.com", 8080));
        assert!(dev.serial.written.contains("AT+CSTT=\"internet\",\"\",\"\"\r\n"));
    }

    #[cfg(feature = "bearer-tcp")]
    #[test]
    fn connect_ok_split_across_reads_still_connects() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CIFSR", "\r\n10.0.0.2\r\n");
        // The connect token arrives in two halves, the tail well after the
        // first response window has closed.
        dev.serial
            .expect("+CIPSTART=\"TCP\",\"example.com\",80", "\r\nOK\r\nCONNE");
        dev.serial
            .expect_delayed("+CIPSTART=\"TCP\",\"example.com\",80", "CT OK\r\n", 3_000);

        assert!(dev.start_tcp_session("example.com", 80));
    }

    #[cfg(feature = "bearer-tcp")]
    #[test]
    fn missing_ip_fails_bring_up() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CIFSR", "\r\nERROR\r\n");

        assert!(!dev.start_tcp_session("example.com", 8080));
        assert!(!dev.serial.written.contains("+CIPSTART"));
    }

    #[test]
    fn send_ok_on_session() {
        let (_time, mut dev) = test_device();
        dev.serial.expect("+CIPSEND", "\r\n> ");
        dev.serial.expect("ping", "\r\nSEND OK\r\n");
        assert!(dev.send_bytes(b"ping"));
    }

    #[test]
    fn receive_waits_for_ipd() {
        let (_time, mut dev) = test_device();
        dev.serial.schedule("\r\n+IPD,4:pong", 200);
        let data = dev.receive_bytes(1_000);
        assert!(contains_token(&data, b"pong"));
    }

    #[test]
    fn close_reports_shutdown() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CIPSHUT", "\r\nSHUT OK\r\n");
        assert!(dev.close_session());
    }
}
