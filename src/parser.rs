//! Pure extraction of structured fields out of raw response text.
//!
//! The wire protocol has no framing beyond token presence, so everything in
//! here is substring scanning. Callers only ever see the typed results; raw
//! text never leaves this module or `transaction`.

/// One entry of a `+CMGL:` message listing.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SmsListEntry<'a> {
    pub id: u32,
    pub sender: &'a str,
    pub body: &'a str,
}

/// Integer field following `header`, 1-based.
///
/// Index 1 is the field immediately after the header, index 2 the field
/// after the first comma. Returns -1 when the header is absent, the text
/// carries an `ERROR` token, or the field does not parse.
pub(crate) fn extract_param(resp: &str, header: &str, param: u8) -> i32 {
    if resp.contains("ERROR") {
        return -1;
    }

    let start = match resp.find(header) {
        Some(idx) => idx + header.len(),
        None => return -1,
    };
    let rest = &resp[start..];

    let field = match param {
        1 => rest.split(|c| c == ',' || c == '\r' || c == '\n').next(),
        2 => rest
            .split_once(',')
            .map(|(_, tail)| tail)
            .and_then(|tail| tail.split(|c| c == ',' || c == '\r' || c == '\n').next()),
        _ => None,
    };

    field
        .and_then(|f| f.trim().parse::<i32>().ok())
        .unwrap_or(-1)
}

/// Service-center number out of a `+CSCA:` response.
pub(crate) fn extract_smsc(resp: &str) -> Option<&str> {
    let start = resp.find("+CSCA: \"")? + "+CSCA: \"".len();
    let len = resp[start..].find('"')?;
    let smsc = &resp[start..start + len];
    if smsc.is_empty() {
        None
    } else {
        Some(smsc)
    }
}

/// First entry of a multi-line `+CMGL:` listing.
///
/// Extracts the numeric message id (first field after the header), the
/// sender number (second quoted field of the header line) and the body (text
/// between the header line terminator and the closing blank-line/`OK`
/// marker). Further entries in the same listing are ignored; the receive
/// pipeline consumes one message per call.
pub(crate) fn first_list_entry(resp: &str) -> Option<SmsListEntry<'_>> {
    let header = resp.find("+CMGL:")?;
    let after = &resp[header + "+CMGL:".len()..];

    let line_end = after.find(['\r', '\n']).unwrap_or(after.len());
    let line = &after[..line_end];

    let id = line.split(',').next()?.trim().parse::<u32>().ok()?;
    let sender = nth_quoted(line, 1)?;

    let body_start = after.find('\n').map(|i| i + 1)?;
    let tail = &after[body_start..];
    let body_end = tail
        .find("\r\n\r\nOK")
        .or_else(|| tail.find("\r\nOK"))
        .unwrap_or(tail.len());

    Some(SmsListEntry {
        id,
        sender,
        body: tail[..body_end].trim(),
    })
}

/// `n`-th (0-based) `"`-delimited field of `line`.
fn nth_quoted(line: &str, n: usize) -> Option<&str> {
    let mut rest = line;
    let mut idx = 0;
    loop {
        let open = rest.find('"')?;
        let close = rest[open + 1..].find('"')? + open + 1;
        if idx == n {
            return Some(&rest[open + 1..close]);
        }
        rest = &rest[close + 1..];
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creg_status_is_second_param() {
        assert_eq!(extract_param("+CREG: 0,1\r\nOK\r\n", "+CREG:", 2), 1);
        assert_eq!(extract_param("+CREG: 0,5\r\nOK\r\n", "+CREG:", 2), 5);
        assert_eq!(extract_param("+CREG: 0,3\r\nOK\r\n", "+CREG:", 2), 3);
    }

    #[test]
    fn csq_rssi_is_first_param() {
        assert_eq!(extract_param("+CSQ: 20,0\r\nOK\r\n", "+CSQ:", 1), 20);
        assert_eq!(extract_param("+CSQ: 99,0\r\nOK\r\n", "+CSQ:", 1), 99);
    }

    #[test]
    fn missing_header_and_errors_yield_sentinel() {
        assert_eq!(extract_param("OK\r\n", "+CSQ:", 1), -1);
        assert_eq!(
            extract_param("+CME ERROR: SIM not inserted\r\n", "+CREG:", 2),
            -1
        );
        assert_eq!(extract_param("+CSQ: abc,0\r\nOK\r\n", "+CSQ:", 1), -1);
    }

    #[test]
    fn smsc_number_is_first_quoted_field() {
        let resp = "+CSCA: \"+447802000332\",145\r\n\r\nOK\r\n";
        assert_eq!(extract_smsc(resp), Some("+447802000332"));
        assert_eq!(extract_smsc("OK\r\n"), None);
        assert_eq!(extract_smsc("+CSCA: \"\",145\r\nOK\r\n"), None);
    }

    #[test]
    fn listing_entry_is_parsed() {
        let resp = "\r\n+CMGL: 3,\"REC UNREAD\",\"+447777123456\",\"\",\"25/02/06,20:58:31+00\"\r\nhello\r\n\r\nOK\r\n";
        let entry = first_list_entry(resp).unwrap();
        assert_eq!(entry.id, 3);
        assert_eq!(entry.sender, "+447777123456");
        assert_eq!(entry.body, "hello");
    }

    #[test]
    fn multiline_body_stops_at_ok_marker() {
        let resp = "+CMGL: 12,\"REC UNREAD\",\"+4512345678\",\"\",\"\"\r\nline one\r\nline two\r\n\r\nOK\r\n";
        let entry = first_list_entry(resp).unwrap();
        assert_eq!(entry.id, 12);
        assert_eq!(entry.body, "line one\r\nline two");
    }

    #[test]
    fn only_first_entry_is_consumed() {
        let resp = "+CMGL: 1,\"REC UNREAD\",\"+111\",\"\",\"\"\r\nfirst\r\n+CMGL: 2,\"REC UNREAD\",\"+222\",\"\",\"\"\r\nsecond\r\n\r\nOK\r\n";
        let entry = first_list_entry(resp).unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.sender, "+111");
    }

    #[test]
    fn empty_listing_yields_none() {
        assert_eq!(first_list_entry("\r\nOK\r\n"), None);
    }
}
