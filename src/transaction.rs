//! Lexical AT transaction engine.
//!
//! Commands go out as `AT<cmd>\r\n`; responses are collected into a single
//! accumulation buffer and classified by token scanning only. No response
//! grammar is assumed beyond `OK`, `ERROR` and a handful of unsolicited
//! result codes, which keeps the engine robust against firmware variation
//! and interleaved notifications.

use core::fmt::Write as _;

use embedded_io::{Read, ReadReady, Write};

use crate::client::Device;
use crate::clock::{elapsed, ms, Clock};
use crate::config::ModemConfig;

/// Accumulation buffer size. Sized for a full `+CMGL` listing page.
pub(crate) const RX_BUF_LEN: usize = 1600;

/// SMS body terminator (Ctrl-Z).
pub(crate) const CTRL_Z: u8 = 0x1a;

/// How a transaction waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitPolicy {
    /// Return as soon as `OK` shows up, or on timeout.
    UntilOk,
    /// Collect for the full window; a short fragmentary drain extends the
    /// window in 10 ms steps to catch a response cut mid transmission.
    Drain,
}

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// Write raw bytes and flush. Transport errors are swallowed; a broken
    /// transport surfaces as a transaction timeout instead.
    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            match self.serial.write(rest) {
                Ok(0) | Err(_) => break,
                Ok(n) => rest = &rest[n..],
            }
        }
        self.serial.flush().ok();
    }

    /// Send `AT<command>\r\n`.
    pub(crate) fn send_at(&mut self, command: &str) {
        let mut line: heapless::String<192> = heapless::String::new();
        let _ = write!(line, "AT{}\r\n", command);
        trace!("AT >> {}", command);
        self.write_raw(line.as_bytes());
    }

    /// Send a command and collect its response. Returns the `OK` flag.
    pub(crate) fn run_transaction(
        &mut self,
        command: &str,
        wait_ms: u32,
        policy: WaitPolicy,
    ) -> bool {
        self.send_at(command);
        self.check_response(wait_ms, policy)
    }

    /// Collect response bytes for up to `wait_ms`, then scan the buffer for
    /// tokens. Returns true when an `OK` was seen.
    pub(crate) fn check_response(&mut self, wait_ms: u32, policy: WaitPolicy) -> bool {
        self.rcv_buf.clear();
        self.at_ack = false;

        let start = self.clock.now();
        let mut window = ms::<TIMER_HZ>(wait_ms);

        loop {
            self.fill_from_serial();

            if policy == WaitPolicy::UntilOk && self.rcv_buf.contains("OK") {
                break;
            }

            if elapsed(self.clock.now(), start) >= window {
                let fragmentary =
                    self.rcv_buf.len() < 6 || !self.rcv_buf.contains('\n');
                if policy == WaitPolicy::Drain
                    && window < ms::<TIMER_HZ>(100)
                    && !self.rcv_buf.is_empty()
                    && fragmentary
                {
                    window = window + ms::<TIMER_HZ>(10);
                    continue;
                }
                break;
            }

            if self.delay(ms(1)).is_err() {
                break;
            }
        }

        self.scan_tokens();
        self.at_ack
    }

    /// Keep collecting into the accumulation buffer, without clearing it,
    /// until `token` appears or `wait_ms` runs out. Lets a caller extend an
    /// earlier read so a token split across the two is still seen whole.
    pub(crate) fn wait_for_token(&mut self, token: &str, wait_ms: u32) -> bool {
        let start = self.clock.now();
        loop {
            if self.rcv_buf.contains(token) {
                self.scan_tokens();
                return true;
            }
            if elapsed(self.clock.now(), start) >= ms::<TIMER_HZ>(wait_ms) {
                self.scan_tokens();
                return false;
            }
            if self.delay(ms(1)).is_err() {
                return false;
            }
            self.fill_from_serial();
        }
    }

    /// Token scan over the freshly collected buffer.
    fn scan_tokens(&mut self) {
        if self.rcv_buf.contains("+CMTI") {
            info!("modem: new message notification");
            self.unread_sms = true;
            self.timers.network_health = self.clock.now();
        } else if self.rcv_buf.contains("PSUT") {
            // *PSUTTZ time sync from the network counts as liveness.
            self.timers.network_health = self.clock.now();
        }

        if self.rcv_buf.contains("OK") {
            self.at_ack = true;
        }

        if let Some(idx) = self.rcv_buf.find("ERROR") {
            let line = &self.rcv_buf[idx..];
            let end = line.find('\r').or_else(|| line.find('\n')).unwrap_or(line.len());
            let line = &line[..end];
            warn!("modem: error response: {}", line);
            self.last_error.clear();
            for c in line.chars() {
                if self.last_error.push(c).is_err() {
                    break;
                }
            }
        }
    }

    /// Move every byte the transport has ready into the accumulation buffer.
    /// Stops when the buffer is full; later bytes are picked up by the next
    /// transaction.
    pub(crate) fn fill_from_serial(&mut self) {
        let mut byte = [0u8; 1];
        while matches!(self.serial.read_ready(), Ok(true)) {
            match self.serial.read(&mut byte) {
                Ok(n) if n > 0 => {
                    if self.rcv_buf.push(byte[0] as char).is_err() {
                        warn!("modem: receive buffer full");
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Discard everything the transport has pending.
    pub(crate) fn flush_input(&mut self) {
        let mut byte = [0u8; 1];
        while matches!(self.serial.read_ready(), Ok(true)) {
            if matches!(self.serial.read(&mut byte), Ok(0) | Err(_)) {
                break;
            }
        }
    }

    /// Re-establish a clean command boundary: flush, blank line, `AT` probe,
    /// and a second more insistent round if the modem stays silent.
    pub(crate) fn resync_transport(&mut self) {
        self.flush_input();
        self.write_raw(b"\r\n");
        self.delay(ms(100)).ok();

        self.send_at("");
        if !self.check_response(1_000, WaitPolicy::Drain) {
            warn!("modem: not responding, trying recovery");
            self.write_raw(b"\r\n\r\n\r\n");
            self.delay(ms(500)).ok();
            self.send_at("");
            self.check_response(1_000, WaitPolicy::Drain);
        }
    }

    /// Escape a stuck `>` data prompt and restore text mode.
    pub(crate) fn abort_pending_command(&mut self) {
        error!("modem: aborting stuck send prompt");
        self.write_raw(&[0x1b]);
        self.delay(ms(500)).ok();
        self.write_raw(b"\r\n\r\n");
        self.delay(ms(500)).ok();
        self.flush_input();

        self.send_at("");
        self.check_response(1_000, WaitPolicy::Drain);
        self.send_at("+CMGF=1");
        self.check_response(1_000, WaitPolicy::Drain);
    }
}
