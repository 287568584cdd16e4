use core::fmt::Write as _;

use embedded_io::{Read, ReadReady, Write};

use crate::client::Device;
use crate::clock::{elapsed, ms, Clock};
use crate::config::ModemConfig;
use crate::error::Error;
use crate::parser;
use crate::sms::ABANDON_AFTER;
use crate::state::ModemState;
use crate::transaction::{WaitPolicy, CTRL_Z};

/// How long to wait for the `>` data prompt.
const PROMPT_WAIT_MS: u32 = 5_000;
/// How long to wait for the `+CMGS:` send confirmation.
const CONFIRM_WAIT_MS: u32 = 20_000;

/// Outcome of the post-failure verification sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendVerification {
    /// Evidence the message went out.
    Sent,
    /// The message sits in storage unsent.
    StillQueued,
    /// No evidence either way.
    Inconclusive,
}

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// Transmit-side settings, run as part of modem initialization. Fails
    /// when no SMS service center number is provisioned, since sends cannot
    /// work without one.
    pub(crate) fn init_tx_sms_settings(&mut self) -> Result<(), Error> {
        self.counters.comm_failures = 0;

        if !self.run_transaction("+CMGF=1", 1_000, WaitPolicy::UntilOk) {
            warn!("modem: failed to set SMS text mode");
            return Err(Error::ErrorResponse);
        }

        self.run_transaction("+CSCA?", 1_000, WaitPolicy::UntilOk);
        match parser::extract_smsc(&self.rcv_buf) {
            Some(smsc) => debug!("modem: SMSC {}", smsc),
            None => {
                warn!("modem: no SMS service center configured");
                return Err(Error::NoSmsc);
            }
        }

        if !self.run_transaction("+CSMP=17,167,0,0", 1_000, WaitPolicy::UntilOk) {
            warn!("modem: failed to set text mode parameters");
            return Err(Error::ErrorResponse);
        }

        Ok(())
    }

    /// Attempt the pending outbound message if its backoff has elapsed,
    /// handling the failure policy: doubled backoff, post-failure
    /// verification, abandonment and the reset escalation.
    pub(crate) fn drive_transmit_queue(&mut self) {
        let now = self.clock.now();
        if !self.tx_queue.due(now) {
            return;
        }

        info!(
            "modem: send attempt, failures so far {}",
            self.counters.comm_failures
        );

        match self.transmit_pending() {
            Ok(()) => {
                info!("modem: message sent");
                self.tx_queue.clear();
                self.counters.comm_failures = 0;
            }
            Err(e) => {
                self.counters.comm_failures += 1;
                warn!(
                    "modem: send failed ({:?}), failures {}",
                    e, self.counters.comm_failures
                );
                self.tx_queue.double_backoff();

                // A send can land even when its handshake is lost to
                // interleaved traffic, so check before retrying and
                // duplicating the message.
                if self.verify_sent() == SendVerification::Sent {
                    info!("modem: message was delivered despite handshake failure");
                    self.tx_queue.clear();
                    self.counters.comm_failures = 0;
                }

                if self.counters.comm_failures > ABANDON_AFTER {
                    error!("modem: repeated send failures, dropping message");
                    self.tx_queue.clear();
                }
                if self.counters.comm_failures > CFG::MAX_TX_FAILURES {
                    error!("modem: too many send failures, forcing reset");
                    self.state = ModemState::Resetting;
                    self.tx_queue.reset_backoff();
                }
            }
        }

        self.tx_queue.last_attempt = self.clock.now();
    }

    /// One full `AT+CMGS` send: prompt handshake, body, Ctrl-Z, confirmation
    /// window. Unsolicited `+CMTI:` notifications arriving inside the window
    /// are counted, and buy the confirmation proportional extra time before
    /// the attempt is written off.
    fn transmit_pending(&mut self) -> Result<(), Error> {
        let (number, body) = match self.tx_queue.pending() {
            Some(m) => (m.number.clone(), m.body.clone()),
            None => return Ok(()),
        };

        self.resync_transport();
        debug!("modem: sending to {}", number.as_str());

        if !self.run_transaction("+CMGF=1", 1_000, WaitPolicy::UntilOk) {
            return Err(Error::ErrorResponse);
        }
        self.delay(ms(100))?;
        self.flush_input();

        let mut cmd: heapless::String<48> = heapless::String::new();
        let _ = write!(cmd, "+CMGS=\"{}\"", number);
        self.send_at(&cmd);

        if !self.wait_prompt(PROMPT_WAIT_MS)? {
            self.abort_pending_command();
            return Err(Error::Prompt);
        }

        self.delay(ms(300))?;
        self.write_raw(body.as_bytes());
        self.delay(ms(300))?;
        self.write_raw(&[CTRL_Z]);

        // Confirmation window. +CMTI notifications are counted but scanned
        // past, so an incoming burst cannot masquerade as a confirmation.
        self.rcv_buf.clear();
        let start = self.clock.now();
        let mut notifications: u32 = 0;
        let mut scan_from = 0usize;
        let mut confirmed = loop {
            self.fill_from_serial();

            while let Some(i) = self.rcv_buf[scan_from..].find("+CMTI:") {
                scan_from += i + "+CMTI:".len();
                notifications += 1;
                info!(
                    "modem: message notification during send, count {}",
                    notifications
                );
            }

            if self.rcv_buf.contains("+CMGS:") {
                break true;
            }
            if self.rcv_buf.contains("+CMS ERROR:") {
                break false;
            }
            if elapsed(self.clock.now(), start) >= ms::<TIMER_HZ>(CONFIRM_WAIT_MS) {
                break false;
            }
            self.delay(ms(10))?;
        };

        if !confirmed && notifications > 0 {
            // Interleaved receives delay the +CMGS line; wait one extra
            // second per notification, then give verification a chance.
            info!(
                "modem: send interrupted by {} notifications, extending wait",
                notifications
            );
            self.delay(ms(notifications * 1_000))?;
            self.fill_from_serial();
            if self.rcv_buf.contains("+CMGS:") {
                info!("modem: delayed send confirmation");
                confirmed = true;
            } else {
                self.delay(ms(2_000))?;
                if self.verify_sent() == SendVerification::Sent {
                    info!("modem: message went out without confirmation");
                    confirmed = true;
                }
            }
        }

        if confirmed {
            Ok(())
        } else if self.rcv_buf.contains("+CMS ERROR:") {
            Err(Error::ErrorResponse)
        } else {
            Err(Error::Unconfirmed)
        }
    }

    /// Wait for the `>` data prompt, then absorb whatever the modem pushed
    /// out right behind it.
    fn wait_prompt(&mut self, wait_ms: u32) -> Result<bool, Error> {
        self.rcv_buf.clear();
        let start = self.clock.now();
        while elapsed(self.clock.now(), start) < ms::<TIMER_HZ>(wait_ms) {
            self.fill_from_serial();
            if self.rcv_buf.contains('>') {
                self.delay(ms(100))?;
                self.fill_from_serial();
                return Ok(true);
            }
            self.delay(ms(10))?;
        }
        Ok(false)
    }

    /// Evidence sweep over the modem state after a failed handshake: last
    /// send status, outbox listings by recipient number, and finally the
    /// unsent store by body prefix.
    pub(crate) fn verify_sent(&mut self) -> SendVerification {
        let (number, body) = match self.tx_queue.pending() {
            Some(m) => (m.number.clone(), m.body.clone()),
            None => return SendVerification::Inconclusive,
        };

        info!("modem: verifying whether the message actually went out");
        self.resync_transport();
        self.run_transaction("+CMGF=1", 1_000, WaitPolicy::UntilOk);

        self.send_at("+CMSS?");
        self.check_response(1_000, WaitPolicy::Drain);
        if self.rcv_buf.contains("+CMGS:") {
            return SendVerification::Sent;
        }

        self.run_transaction("+CMGL=\"ALL\"", 5_000, WaitPolicy::UntilOk);
        if self.rcv_buf.contains(number.as_str()) {
            return SendVerification::Sent;
        }

        self.run_transaction("+CPMS=\"SM\"", 1_000, WaitPolicy::UntilOk);
        self.run_transaction("+CMGL=\"STO SENT\"", 2_000, WaitPolicy::UntilOk);
        if self.rcv_buf.contains(number.as_str()) {
            return SendVerification::Sent;
        }

        self.run_transaction("+CMGL=\"STO UNSENT\"", 2_000, WaitPolicy::UntilOk);
        let prefix = body.get(..10).unwrap_or(body.as_str());
        if !prefix.is_empty() && self.rcv_buf.contains(prefix) {
            return SendVerification::StillQueued;
        }

        SendVerification::Inconclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_device;

    #[test]
    fn clean_send_clears_the_queue() {
        let (time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CMGS=\"+4512345678\"", "\r\n> ");
        dev.serial.expect("hello there", "\r\n+CMGS: 12\r\n\r\nOK\r\n");

        dev.queue_sms("+4512345678", "hello there");
        time.set(10_000);
        dev.drive_transmit_queue();

        assert!(!dev.tx_queue.is_loaded());
        assert_eq!(dev.counters.comm_failures, 0);
        assert!(dev.serial.written.contains("AT+CMGS=\"+4512345678\"\r\n"));
        assert!(dev.serial.written.contains("hello there\u{1a}"));
    }

    #[test]
    fn missing_prompt_aborts_and_backs_off() {
        let (time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        // No prompt rule: +CMGS gets a bare OK, never a '>'.

        dev.queue_sms("+4512345678", "hello");
        time.set(10_000);
        dev.drive_transmit_queue();

        assert!(dev.tx_queue.is_loaded());
        assert_eq!(dev.counters.comm_failures, 1);
        assert_eq!(dev.tx_queue.backoff.ticks(), 4_000);
        // The stuck prompt escape sequence went out.
        assert!(dev.serial.written.contains('\u{1b}'));
    }

    #[test]
    fn backoff_gates_retry_until_due() {
        let (time, mut dev) = test_device();
        dev.queue_sms("+4512345678", "hello");
        time.set(10_000);
        dev.drive_transmit_queue();
        assert_eq!(dev.counters.comm_failures, 1);

        // Second call inside the 4 s backoff does nothing at all.
        let written = dev.serial.written.len();
        dev.drive_transmit_queue();
        assert_eq!(dev.serial.written.len(), written);
    }

    #[test]
    fn fifth_failure_abandons_the_message() {
        let (time, mut dev) = test_device();
        dev.state = ModemState::Ready;
        dev.queue_sms("+4512345678", "hello");

        let mut backoffs = std::vec::Vec::new();
        for _ in 0..5 {
            time.set(time.get().wrapping_add(70_000));
            dev.drive_transmit_queue();
            backoffs.push(dev.tx_queue.backoff.ticks());
        }

        assert_eq!(backoffs, [4_000, 8_000, 16_000, 32_000, 2_000]);
        assert!(!dev.tx_queue.is_loaded());
        assert_eq!(dev.counters.comm_failures, 5);
        // Five failures abandon the message but do not force a reset.
        assert_eq!(dev.state(), ModemState::Ready);
    }

    #[test]
    fn failures_beyond_maximum_force_a_reset() {
        let (time, mut dev) = test_device();
        dev.state = ModemState::Ready;
        dev.counters.comm_failures = 10;
        dev.queue_sms("+4512345678", "hello");
        time.set(10_000);
        dev.drive_transmit_queue();

        assert_eq!(dev.counters.comm_failures, 11);
        assert_eq!(dev.state(), ModemState::Resetting);
        assert!(!dev.tx_queue.is_loaded());
        assert_eq!(dev.tx_queue.backoff.ticks(), 2_000);
    }

    #[test]
    fn delayed_confirmation_after_notification_burst() {
        let (time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CMGS=\"+4512345678\"", "\r\n> ");
        // The body write triggers an immediate inbound notification and a
        // confirmation that arrives only after the 20 s window has closed.
        dev.serial.expect("hello", "\r\n+CMTI: \"SM\",4\r\n");
        dev.serial
            .expect_delayed("hello", "\r\n+CMGS: 12\r\n\r\nOK\r\n", 20_500);

        dev.queue_sms("+4512345678", "hello");
        time.set(10_000);
        dev.drive_transmit_queue();

        assert!(!dev.tx_queue.is_loaded());
        assert_eq!(dev.counters.comm_failures, 0);
    }

    #[test]
    fn verification_rescues_unconfirmed_send() {
        let (time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CMGS=\"+4512345678\"", "\r\n> ");
        // Confirmation never arrives, but the outbox listing shows the
        // message under the recipient number.
        dev.serial.expect(
            "+CMGL=\"ALL\"",
            "\r\n+CMGL: 1,\"STO SENT\",\"+4512345678\",\"\",\"\"\r\nhello\r\n\r\nOK\r\n",
        );

        dev.queue_sms("+4512345678", "hello");
        time.set(10_000);
        dev.drive_transmit_queue();

        assert!(!dev.tx_queue.is_loaded());
        assert_eq!(dev.counters.comm_failures, 0);
    }

    #[test]
    fn still_queued_in_unsent_store_is_not_sent() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect(
            "+CMGL=\"STO UNSENT\"",
            "\r\n+CMGL: 1,\"STO UNSENT\",\"+4599999999\",\"\",\"\"\r\nhello worl\r\n\r\nOK\r\n",
        );
        dev.queue_sms("+4512345678", "hello world");
        assert_eq!(dev.verify_sent(), SendVerification::StillQueued);
    }

    #[test]
    fn missing_smsc_fails_tx_settings() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CSCA?", "\r\n+CSCA: \"\",145\r\n\r\nOK\r\n");
        assert_eq!(dev.init_tx_sms_settings(), Err(Error::NoSmsc));
    }
}
