//! Shared test doubles: a simulated-time clock and a scripted serial port.
//!
//! Timer and serial share one millisecond counter, so replies scheduled "in
//! the future" are released by the same simulated time the driver's delay
//! loops advance. Tests run instantly regardless of how long the scripted
//! exchanges take in modem time.

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use fugit::{TimerDurationU32, TimerInstantU32};

use crate::client::Device;
use crate::clock::Clock;
use crate::config::{ModemConfig, NoPin};

pub type SharedTime = Rc<Cell<u32>>;

pub struct MockTimer {
    time: SharedTime,
    armed: Option<u32>,
}

impl MockTimer {
    pub fn new(time: SharedTime) -> Self {
        Self { time, armed: None }
    }
}

impl Clock<1000> for MockTimer {
    type Error = Infallible;

    fn now(&mut self) -> TimerInstantU32<1000> {
        TimerInstantU32::from_ticks(self.time.get())
    }

    fn start(&mut self, duration: TimerDurationU32<1000>) -> Result<(), Self::Error> {
        self.armed = Some(duration.ticks());
        Ok(())
    }

    fn wait(&mut self) -> nb::Result<(), Self::Error> {
        if let Some(d) = self.armed.take() {
            self.time.set(self.time.get().wrapping_add(d));
        }
        Ok(())
    }
}

struct Rule {
    pattern: &'static str,
    reply: &'static str,
    delay_ms: u32,
}

/// Scripted serial port.
///
/// Outgoing bytes are captured in `written` and chopped into commands at
/// `\n` or Ctrl-Z. Each completed command fires every matching rule, in the
/// order the rules were added; a command matching no rule gets the
/// `default_reply` if it looks like an AT command.
pub struct MockSerial {
    time: SharedTime,
    rx: VecDeque<u8>,
    /// Replies not yet due, as (release time, bytes).
    pending: Vec<(u32, Vec<u8>)>,
    rules: Vec<Rule>,
    pub default_reply: Option<String>,
    cmd: String,
    pub written: String,
}

impl MockSerial {
    pub fn new(time: SharedTime) -> Self {
        Self {
            time,
            rx: VecDeque::new(),
            pending: Vec::new(),
            rules: Vec::new(),
            default_reply: None,
            cmd: String::new(),
            written: String::new(),
        }
    }

    /// Reply with `reply` whenever a completed command contains `pattern`.
    pub fn expect(&mut self, pattern: &'static str, reply: &'static str) {
        self.rules.push(Rule {
            pattern,
            reply,
            delay_ms: 0,
        });
    }

    /// Like [`expect`](Self::expect), but the reply is released only
    /// `delay_ms` of simulated time after the command completes.
    pub fn expect_delayed(&mut self, pattern: &'static str, reply: &'static str, delay_ms: u32) {
        self.rules.push(Rule {
            pattern,
            reply,
            delay_ms,
        });
    }

    /// Make bytes readable right now, as if sent unsolicited.
    pub fn inject(&mut self, bytes: &str) {
        self.rx.extend(bytes.bytes());
    }

    /// Make bytes readable once simulated time reaches `at_ms`.
    pub fn schedule(&mut self, bytes: &str, at_ms: u32) {
        self.pending.push((at_ms, bytes.bytes().collect()));
    }

    fn release_due(&mut self) {
        let now = self.time.get();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0 <= now {
                let (_, bytes) = self.pending.remove(i);
                self.rx.extend(bytes);
            } else {
                i += 1;
            }
        }
    }

    fn complete_command(&mut self) {
        let cmd = std::mem::take(&mut self.cmd);
        let now = self.time.get();

        let mut matched = false;
        for rule in &self.rules {
            if cmd.contains(rule.pattern) {
                matched = true;
                if rule.delay_ms == 0 {
                    self.rx.extend(rule.reply.bytes());
                } else {
                    self.pending
                        .push((now.wrapping_add(rule.delay_ms), rule.reply.bytes().collect()));
                }
            }
        }

        if !matched {
            if let Some(reply) = &self.default_reply {
                if cmd.trim_start().starts_with("AT") {
                    let reply = reply.clone();
                    self.rx.extend(reply.bytes());
                }
            }
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = Infallible;
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.release_due();
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.release_due();
        Ok(!self.rx.is_empty())
    }
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &b in buf {
            self.written.push(b as char);
            self.cmd.push(b as char);
            if b == b'\n' || b == 0x1a {
                self.complete_command();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Config with no control pins wired up and the default thresholds.
pub struct TestConfig;

impl ModemConfig for TestConfig {
    type ResetPin = NoPin;
    type PowerKeyPin = NoPin;
    type ExtPowerPin = NoPin;

    fn reset_pin(&mut self) -> Option<&mut Self::ResetPin> {
        None
    }

    fn power_key_pin(&mut self) -> Option<&mut Self::PowerKeyPin> {
        None
    }

    fn ext_power_pin(&mut self) -> Option<&mut Self::ExtPowerPin> {
        None
    }
}

pub type TestDevice = Device<MockSerial, MockTimer, TestConfig, 1000>;

pub fn test_device() -> (SharedTime, TestDevice) {
    let time: SharedTime = Rc::new(Cell::new(0));
    let serial = MockSerial::new(time.clone());
    let timer = MockTimer::new(time.clone());
    (time, Device::new(serial, timer, TestConfig))
}
