use core::fmt::Write as _;

use embedded_io::{Read, ReadReady, Write};

use crate::client::Device;
use crate::clock::Clock;
use crate::config::ModemConfig;
use crate::parser;
use crate::sms::truncated;
use crate::transaction::WaitPolicy;

impl<W, CLK, CFG, const TIMER_HZ: u32> Device<W, CLK, CFG, TIMER_HZ>
where
    W: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    CFG: ModemConfig,
{
    /// Pull one unread message off the modem into the inbound mailbox.
    ///
    /// Lists unread messages, parses the first entry, then deletes it from
    /// modem storage by index. The delete is fire and forget: a failed
    /// delete means the message shows up again on the next poll, which is
    /// preferable to losing it. Returns true when a message was taken.
    pub(crate) fn drain_one_message(&mut self) -> bool {
        if !self.run_transaction("+CMGF=1", 1_000, WaitPolicy::UntilOk) {
            return false;
        }

        self.run_transaction("+CMGL=\"REC UNREAD\"", 2_000, WaitPolicy::UntilOk);

        let id = match parser::first_list_entry(&self.rcv_buf) {
            Some(entry) => {
                self.inbound.sender = truncated(entry.sender);
                self.inbound.body = truncated(entry.body);
                entry.id
            }
            None => return false,
        };
        debug!("modem: received message {} from {}", id, self.inbound.sender.as_str());

        let mut cmd: heapless::String<24> = heapless::String::new();
        let _ = write!(cmd, "+CMGD={}", id);
        self.run_transaction(&cmd, 1_000, WaitPolicy::UntilOk);

        true
    }
}

#[cfg(test)]
mod tests {
    use crate::test_helpers::test_device;

    const LISTING: &str = "\r\n+CMGL: 3,\"REC UNREAD\",\"+4577001122\",\"\",\"26/08/29,10:30:00+08\"\r\nmeter reading 1042\r\n\r\nOK\r\n";

    #[test]
    fn drains_first_unread_and_deletes_it() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        dev.serial.expect("+CMGL=\"REC UNREAD\"", LISTING);

        assert!(dev.drain_one_message());
        assert_eq!(dev.last_received_sender(), "+4577001122");
        assert_eq!(dev.last_received_body(), "meter reading 1042");
        assert!(dev.serial.written.contains("AT+CMGD=3\r\n"));
    }

    #[test]
    fn empty_listing_yields_nothing() {
        let (_time, mut dev) = test_device();
        dev.serial.default_reply = Some("OK\r\n".into());
        assert!(!dev.drain_one_message());
        assert!(!dev.serial.written.contains("+CMGD"));
    }

    #[test]
    fn text_mode_failure_skips_listing() {
        let (_time, mut dev) = test_device();
        dev.serial.expect("+CMGF=1", "\r\nERROR\r\n");
        assert!(!dev.drain_one_message());
        assert!(!dev.serial.written.contains("+CMGL"));
    }
}
