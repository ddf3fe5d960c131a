//! Telnet Framer (C4): IAC byte-stuffing, option negotiation, EOR record
//! boundaries, and the STARTTLS handshake trigger.

use log::{debug, trace, warn};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const EL: u8 = 248;
pub const EC: u8 = 247;
pub const AYT: u8 = 246;
pub const AO: u8 = 245;
pub const IP: u8 = 244;
pub const BRK: u8 = 243;
pub const DM: u8 = 242;
pub const NOP: u8 = 241;
pub const EOR: u8 = 239;
pub const SE: u8 = 240;

pub const OPT_BINARY: u8 = 0;
pub const OPT_TERMINAL_TYPE: u8 = 24;
pub const OPT_END_OF_RECORD: u8 = 25;
pub const OPT_TN3270E: u8 = 40;
pub const OPT_START_TLS: u8 = 46;

pub const TT_SEND: u8 = 1;
pub const TT_IS: u8 = 0;

/// One decoded unit of the telnet stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// A complete 3270 record delimited by `IAC EOR`, IAC already unescaped.
    Record(Vec<u8>),
    /// A single-byte telnet command (codes 241-249).
    Command(u8),
    /// `IAC {WILL|WONT|DO|DONT} <opt>`.
    OptionSignal { verb: u8, option: u8 },
    /// `IAC SB ... IAC SE`, payload with `IAC IAC` unescaped.
    Subnegotiation { option: u8, data: Vec<u8> },
}

/// Action the caller should take in response to a decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerAction {
    Send(Vec<u8>),
    StartTls,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    SawIac,
    SawVerb(u8),
    InSubneg,
    SubnegSawIac,
}

/// Incremental Telnet parser/responder.
///
/// Consumes raw bytes via [`Framer::feed`], which returns any fully decoded
/// events together with the framer's own protocol responses (queued in
/// arrival order). Partial records persist across calls.
pub struct Framer {
    state: ParseState,
    record_buf: Vec<u8>,
    subneg_buf: Vec<u8>,
    subneg_option: u8,
    tn3270e_enabled: bool,
    terminal_type: String,
    do_eor_sent: bool,
}

impl Framer {
    pub fn new(tn3270e_enabled: bool, terminal_type: impl Into<String>) -> Self {
        Self {
            state: ParseState::Data,
            record_buf: Vec::new(),
            subneg_buf: Vec::new(),
            subneg_option: 0,
            tn3270e_enabled,
            terminal_type: terminal_type.into(),
            do_eor_sent: false,
        }
    }

    /// Feed raw bytes, returning `(events, responses)`. `responses` are the
    /// literal bytes to write back to the transport, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> (Vec<TelnetEvent>, Vec<u8>) {
        let mut events = Vec::new();
        let mut responses = Vec::new();
        for &b in bytes {
            self.feed_byte(b, &mut events, &mut responses);
        }
        (events, responses)
    }

    fn feed_byte(&mut self, b: u8, events: &mut Vec<TelnetEvent>, responses: &mut Vec<u8>) {
        match self.state {
            ParseState::Data => {
                if b == IAC {
                    self.state = ParseState::SawIac;
                } else {
                    self.record_buf.push(b);
                }
            }
            ParseState::SawIac => match b {
                IAC => {
                    self.record_buf.push(0xFF);
                    self.state = ParseState::Data;
                }
                EOR => {
                    events.push(TelnetEvent::Record(std::mem::take(&mut self.record_buf)));
                    self.state = ParseState::Data;
                }
                WILL | WONT | DO | DONT => {
                    self.state = ParseState::SawVerb(b);
                }
                SB => {
                    self.subneg_buf.clear();
                    self.state = ParseState::InSubneg;
                }
                NOP | DM | BRK | IP | AO | AYT | EC | EL | GA => {
                    events.push(TelnetEvent::Command(b));
                    self.state = ParseState::Data;
                }
                _ => {
                    warn!("telnet: unexpected byte 0x{b:02X} after IAC, discarding partial data");
                    self.state = ParseState::Data;
                }
            },
            ParseState::SawVerb(verb) => {
                events.push(TelnetEvent::OptionSignal { verb, option: b });
                let action = self.handle_option_signal(verb, b);
                responses.extend(action);
                self.state = ParseState::Data;
            }
            ParseState::InSubneg => {
                if b == IAC {
                    self.state = ParseState::SubnegSawIac;
                } else {
                    self.subneg_buf.push(b);
                }
            }
            ParseState::SubnegSawIac => match b {
                IAC => {
                    self.subneg_buf.push(0xFF);
                    self.state = ParseState::InSubneg;
                }
                SE => {
                    let option = self.subneg_buf.first().copied().unwrap_or(0);
                    let data = if self.subneg_buf.is_empty() {
                        Vec::new()
                    } else {
                        self.subneg_buf[1..].to_vec()
                    };
                    let response = self.handle_subnegotiation(option, &data);
                    events.push(TelnetEvent::Subnegotiation { option, data });
                    responses.extend(response);
                    self.state = ParseState::Data;
                }
                _ => {
                    warn!("telnet: malformed subnegotiation, IAC followed by 0x{b:02X}");
                    self.state = ParseState::Data;
                }
            },
        }
    }

    /// Option policy for a received `DO`/`DONT`/`WILL`/`WONT`.
    fn handle_option_signal(&mut self, verb: u8, option: u8) -> Vec<u8> {
        trace!("telnet: recv {} {}", verb_name(verb), option);
        match verb {
            DO => match option {
                OPT_TN3270E => {
                    if self.tn3270e_enabled {
                        vec![IAC, WILL, option]
                    } else {
                        vec![IAC, WONT, option]
                    }
                }
                OPT_BINARY | OPT_TERMINAL_TYPE => vec![IAC, WILL, option],
                OPT_END_OF_RECORD => {
                    let mut out = vec![IAC, WILL, option];
                    if !self.do_eor_sent {
                        out.extend([IAC, DO, OPT_END_OF_RECORD]);
                        self.do_eor_sent = true;
                    }
                    out
                }
                OPT_START_TLS => {
                    debug!("telnet: STARTTLS requested by host");
                    vec![IAC, WILL, option, IAC, SB, OPT_START_TLS, 1, IAC, SE]
                }
                _ => vec![IAC, WONT, option],
            },
            WILL => match option {
                OPT_BINARY => vec![IAC, DO, OPT_BINARY],
                _ => Vec::new(),
            },
            DONT | WONT => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn handle_subnegotiation(&mut self, option: u8, data: &[u8]) -> Vec<u8> {
        if option == OPT_TERMINAL_TYPE && data.first() == Some(&TT_SEND) {
            let mut out = vec![IAC, SB, OPT_TERMINAL_TYPE, TT_IS];
            out.extend(self.terminal_type.as_bytes());
            out.extend([IAC, SE]);
            return out;
        }
        Vec::new()
    }

    /// `true` once the STARTTLS subnegotiation was answered with `FOLLOWS`
    /// (`IAC SB START_TLS FOLLOWS SE` queued) and the transport should be
    /// upgraded after flushing that response.
    pub fn wants_tls_upgrade(&self, option: u8, verb: u8) -> bool {
        verb == DO && option == OPT_START_TLS
    }

    /// Wrap a raw 3270 record for transmission: escape `IAC` to `IAC IAC`
    /// and terminate with `IAC EOR`.
    pub fn encode_record(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 2);
        for &b in data {
            out.push(b);
            if b == IAC {
                out.push(IAC);
            }
        }
        out.extend([IAC, EOR]);
        out
    }
}

fn verb_name(verb: u8) -> &'static str {
    match verb {
        WILL => "WILL",
        WONT => "WONT",
        DO => "DO",
        DONT => "DONT",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iac_escaping_is_an_involution() {
        let original = vec![0x01, 0xFF, 0x02, 0xFF, 0xFF, 0x03];
        let encoded = Framer::encode_record(&original);
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (events, _) = framer.feed(&encoded);
        assert_eq!(events.len(), 1);
        match &events[0] {
            TelnetEvent::Record(r) => assert_eq!(r, &original),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn do_tn3270e_replies_will_when_enabled() {
        let mut framer = Framer::new(true, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, DO, OPT_TN3270E]);
        assert_eq!(responses, vec![IAC, WILL, OPT_TN3270E]);
    }

    #[test]
    fn do_tn3270e_replies_wont_when_disabled() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, DO, OPT_TN3270E]);
        assert_eq!(responses, vec![IAC, WONT, OPT_TN3270E]);
    }

    #[test]
    fn do_unknown_option_replies_wont() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, DO, 99]);
        assert_eq!(responses, vec![IAC, WONT, 99]);
    }

    #[test]
    fn will_transmit_binary_replies_do() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, WILL, OPT_BINARY]);
        assert_eq!(responses, vec![IAC, DO, OPT_BINARY]);
    }

    #[test]
    fn terminal_type_send_replies_is() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, SB, OPT_TERMINAL_TYPE, TT_SEND, IAC, SE]);
        let mut expected = vec![IAC, SB, OPT_TERMINAL_TYPE, TT_IS];
        expected.extend(b"IBM-DYNAMIC");
        expected.extend([IAC, SE]);
        assert_eq!(responses, expected);
    }

    #[test]
    fn start_tls_do_replies_will_and_follows() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (_events, responses) = framer.feed(&[IAC, DO, OPT_START_TLS]);
        assert_eq!(responses, vec![IAC, WILL, OPT_START_TLS, IAC, SB, OPT_START_TLS, 1, IAC, SE]);
    }

    #[test]
    fn partial_records_buffer_across_feed_calls() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (events1, _) = framer.feed(&[0x01, 0x02]);
        assert!(events1.is_empty());
        let (events2, _) = framer.feed(&[0x03, IAC, EOR]);
        assert_eq!(events2, vec![TelnetEvent::Record(vec![0x01, 0x02, 0x03])]);
    }

    #[test]
    fn commands_are_decoded_single_byte() {
        let mut framer = Framer::new(false, "IBM-DYNAMIC");
        let (events, _) = framer.feed(&[IAC, NOP]);
        assert_eq!(events, vec![TelnetEvent::Command(NOP)]);
    }
}
</content>
