//! TN3270E Layer (C5): device-type/functions negotiation over the `TN3270E`
//! (`40`) telnet option, and the 5-byte per-record header used once that
//! negotiation completes.

use log::{debug, warn};

use crate::telnet::{IAC, SB, SE};

/// The `TN3270E` telnet option number, repeated here for subnegotiation
/// framing (see also [`crate::telnet::OPT_TN3270E`]).
pub const OPT_TN3270E: u8 = 40;

const MSG_DEVICE_TYPE: u8 = 0x02;
const MSG_FUNCTIONS: u8 = 0x03;
const MSG_IS: u8 = 0x04;
const MSG_SEND: u8 = 0x08;
const MSG_REQUEST: u8 = 0x07;

const FUNC_RESPONSES: u8 = 0x02;

/// Data-type values carried in byte 0 of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Tn3270Data,
    Other(u8),
}

impl DataType {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => DataType::Tn3270Data,
            other => DataType::Other(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            DataType::Tn3270Data => 0,
            DataType::Other(b) => b,
        }
    }
}

/// Response-flag values carried in byte 2 of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFlag {
    NoResponse,
    ErrorResponse,
    AlwaysResponse,
    Other(u8),
}

impl ResponseFlag {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => ResponseFlag::NoResponse,
            1 => ResponseFlag::ErrorResponse,
            2 => ResponseFlag::AlwaysResponse,
            other => ResponseFlag::Other(other),
        }
    }
}

/// The 5-byte `data-type | request-flag | response-flag | seq-hi | seq-lo`
/// prefix that precedes every inbound record once TN3270E mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub data_type: u8,
    pub request_flag: u8,
    pub response_flag: u8,
    pub seq_no: u16,
}

impl RecordHeader {
    /// Parse a header from the first 5 bytes of an inbound record. Returns
    /// `None` if `record` is shorter than 5 bytes.
    pub fn parse(record: &[u8]) -> Option<(Self, &[u8])> {
        if record.len() < 5 {
            return None;
        }
        let header = RecordHeader {
            data_type: record[0],
            request_flag: record[1],
            response_flag: record[2],
            seq_no: u16::from_be_bytes([record[3], record[4]]),
        };
        Some((header, &record[5..]))
    }

    /// Encode a positive or negative TN3270E response record for `seq_no`.
    /// `is_error` selects `NEGATIVE-RESPONSE (02)` vs `POSITIVE-RESPONSE
    /// (00)` in byte 1 per RFC 2355; this crate only ever acknowledges
    /// successfully-applied records, so only the positive form is used.
    pub fn response_record(seq_no: u16) -> Vec<u8> {
        let [hi, lo] = seq_no.to_be_bytes();
        vec![0x02, 0x00, 0x00, hi, lo]
    }

    /// Prefix `payload` with a zeroed 5-byte header for outbound records in
    /// TN3270E mode.
    pub fn wrap_outbound(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.extend([0, 0, 0, 0, 0]);
        out.extend_from_slice(payload);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    NotStarted,
    AwaitingDeviceTypeIs,
    AwaitingFunctionsIs,
    Complete,
}

/// Outcome of feeding one `TN3270E` subnegotiation to the [`Negotiator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tn3270eEvent {
    /// Negotiation finished; TN3270E record headers are now in effect.
    Negotiated { device_type: String, lu_name: Option<String> },
    /// Nothing externally observable happened yet.
    Pending,
}

/// Drives the `SEND DEVICE-TYPE` / `DEVICE-TYPE IS` / `FUNCTIONS REQUEST` /
/// `FUNCTIONS IS` subnegotiation sequence (RFC 2355).
pub struct Negotiator {
    state: NegotiationState,
    terminal_type: String,
    lu_name: Option<String>,
    negotiated_device_type: Option<String>,
    negotiated_lu: Option<String>,
    functions_locked: bool,
}

impl Negotiator {
    pub fn new(terminal_type: impl Into<String>, lu_name: Option<String>) -> Self {
        Self {
            state: NegotiationState::NotStarted,
            terminal_type: terminal_type.into(),
            lu_name,
            negotiated_device_type: None,
            negotiated_lu: None,
            functions_locked: false,
        }
    }

    pub fn is_negotiated(&self) -> bool {
        self.state == NegotiationState::Complete
    }

    pub fn device_type(&self) -> Option<&str> {
        self.negotiated_device_type.as_deref()
    }

    /// Handle one `IAC SB 40 ... IAC SE` payload (option byte already
    /// stripped). Returns the raw bytes to send in response, if any, and an
    /// event describing what happened.
    pub fn process_subnegotiation(&mut self, data: &[u8]) -> (Vec<u8>, Tn3270eEvent) {
        match data {
            [MSG_SEND, MSG_DEVICE_TYPE] => {
                let mut out = vec![MSG_DEVICE_TYPE, MSG_REQUEST];
                out.extend(self.terminal_type.as_bytes());
                if let Some(lu) = &self.lu_name {
                    out.push(0x01);
                    out.extend(lu.as_bytes());
                }
                self.state = NegotiationState::AwaitingDeviceTypeIs;
                (frame(out), Tn3270eEvent::Pending)
            }
            [MSG_DEVICE_TYPE, MSG_IS, rest @ ..] => {
                let (device_type, lu) = split_type_and_lu(rest);
                self.negotiated_device_type = Some(device_type.clone());
                self.negotiated_lu = lu;
                let out = vec![MSG_FUNCTIONS, MSG_REQUEST, FUNC_RESPONSES];
                self.state = NegotiationState::AwaitingFunctionsIs;
                (frame(out), Tn3270eEvent::Pending)
            }
            [MSG_FUNCTIONS, MSG_IS, ..] => {
                self.functions_locked = true;
                self.state = NegotiationState::Complete;
                debug!("tn3270e: negotiation complete, device={:?}", self.negotiated_device_type);
                (
                    Vec::new(),
                    Tn3270eEvent::Negotiated {
                        device_type: self.negotiated_device_type.clone().unwrap_or_default(),
                        lu_name: self.negotiated_lu.clone(),
                    },
                )
            }
            other => {
                warn!("tn3270e: unexpected subnegotiation payload {other:?}");
                (Vec::new(), Tn3270eEvent::Pending)
            }
        }
    }
}

fn split_type_and_lu(rest: &[u8]) -> (String, Option<String>) {
    if let Some(pos) = rest.iter().position(|&b| b == 0x01) {
        let device_type = String::from_utf8_lossy(&rest[..pos]).into_owned();
        let lu = String::from_utf8_lossy(&rest[pos + 1..]).into_owned();
        (device_type, Some(lu))
    } else {
        (String::from_utf8_lossy(rest).into_owned(), None)
    }
}

fn frame(mut data: Vec<u8>) -> Vec<u8> {
    let mut out = vec![IAC, SB, OPT_TN3270E];
    out.append(&mut data);
    out.extend([IAC, SE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_device_type_requests_configured_terminal_type() {
        let mut neg = Negotiator::new("IBM-3278-2-E", None);
        let (response, event) = neg.process_subnegotiation(&[MSG_SEND, MSG_DEVICE_TYPE]);
        assert_eq!(event, Tn3270eEvent::Pending);
        let mut expected = vec![IAC, SB, OPT_TN3270E, MSG_DEVICE_TYPE, MSG_REQUEST];
        expected.extend(b"IBM-3278-2-E");
        expected.extend([IAC, SE]);
        assert_eq!(response, expected);
    }

    #[test]
    fn device_type_is_with_lu_name_then_functions_is_completes() {
        let mut neg = Negotiator::new("IBM-3278-2-E", Some("LU1".into()));
        let mut data = vec![MSG_DEVICE_TYPE, MSG_IS];
        data.extend(b"IBM-3278-2-E");
        data.push(0x01);
        data.extend(b"LU1");
        let (response, _) = neg.process_subnegotiation(&data);
        assert_eq!(
            response,
            frame(vec![MSG_FUNCTIONS, MSG_REQUEST, FUNC_RESPONSES])
        );

        let (response, event) = neg.process_subnegotiation(&[MSG_FUNCTIONS, MSG_IS, FUNC_RESPONSES]);
        assert!(response.is_empty());
        assert_eq!(
            event,
            Tn3270eEvent::Negotiated {
                device_type: "IBM-3278-2-E".into(),
                lu_name: Some("LU1".into()),
            }
        );
        assert!(neg.is_negotiated());
        assert_eq!(neg.device_type(), Some("IBM-3278-2-E"));
    }

    #[test]
    fn record_header_parses_5_byte_prefix() {
        let record = [0x00, 0x00, 0x02, 0x00, 0x07, 0xC1, 0xC2];
        let (header, payload) = RecordHeader::parse(&record).unwrap();
        assert_eq!(header.data_type, 0);
        assert_eq!(header.response_flag, 2);
        assert_eq!(header.seq_no, 7);
        assert_eq!(payload, &[0xC1, 0xC2]);
    }

    #[test]
    fn response_record_echoes_sequence_number() {
        assert_eq!(RecordHeader::response_record(0x0107), vec![0x02, 0x00, 0x00, 0x01, 0x07]);
    }

    #[test]
    fn outbound_wrap_prepends_zero_header() {
        assert_eq!(RecordHeader::wrap_outbound(&[0xAA, 0xBB]), vec![0, 0, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn record_header_rejects_short_input() {
        assert!(RecordHeader::parse(&[0, 0, 2]).is_none());
    }

    #[test]
    fn data_type_round_trips() {
        assert_eq!(DataType::from_byte(0).to_byte(), 0);
        assert_eq!(DataType::from_byte(7).to_byte(), 7);
    }

    #[test]
    fn response_flag_decodes_known_values() {
        assert_eq!(ResponseFlag::from_byte(0), ResponseFlag::NoResponse);
        assert_eq!(ResponseFlag::from_byte(2), ResponseFlag::AlwaysResponse);
    }
}
</content>
