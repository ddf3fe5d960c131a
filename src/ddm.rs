//! DDM / IND$FILE Engine (C10): the file-transfer sub-protocol carried over
//! `WSF` structured fields with SFID `0xD0`.
//!
//! Grounded on a reference client's `_process_ddm_0xd0*` handlers and
//! `__next_get`/`__query_reply` framing helpers: every opcode, error code,
//! and byte offset below is taken from that implementation.

use crate::codec::CodecRegistry;
use crate::codes::Aid;
use crate::error::{Error, Result};
use crate::outbound::StructuredField;

const SFID_DDM: u8 = 0xD0;

const OP_OPEN: [u8; 2] = [0x00, 0x12];
const OP_OPEN_ACK: [u8; 2] = [0x00, 0x09];
const OP_OPEN_ERR: [u8; 2] = [0x00, 0x08];
const OP_SET_CURSOR: [u8; 2] = [0x45, 0x11];
const OP_SET_CURSOR_ERR: [u8; 2] = [0x45, 0x08];
const OP_GET: [u8; 2] = [0x46, 0x11];
const OP_GET_DATA: [u8; 2] = [0x46, 0x05];
const OP_GET_ERR: [u8; 2] = [0x46, 0x08];
const OP_INSERT: [u8; 2] = [0x47, 0x11];
const OP_INSERT_ERR: [u8; 2] = [0x47, 0x08];
const OP_DATA_TO_INSERT: [u8; 2] = [0x47, 0x04];
const OP_DATA_ACK: [u8; 2] = [0x47, 0x05];
const OP_CLOSE: [u8; 2] = [0x41, 0x12];
const OP_CLOSE_ACK: [u8; 2] = [0x41, 0x09];

const EC_OPEN_FAILED: [u8; 2] = [0x01, 0x00];
const EC_PAST_EOF: [u8; 2] = [0x22, 0x00];
const EC_SYNTAX: [u8; 2] = [0x60, 0x00];

/// Direction established at `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client reads a local source and answers `Get` requests.
    Upload,
    /// Client writes `Data-To-Insert` records to a local sink.
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Open,
}

/// The local side of a transfer: wherever bytes actually come from or go
/// to is outside this crate's concern (a file, a buffer, a pipe); the
/// engine only needs a source to read from and a sink to write to.
pub trait TransferSink {
    /// Called once a transfer direction and file name are known. `upload`
    /// is `true` when the host will `Get` from this sink.
    fn open(&mut self, name: &str, upload: bool) -> std::io::Result<()>;
    /// Read up to `max_len` bytes for the next upload record. An empty
    /// result signals end-of-file.
    fn read_chunk(&mut self, max_len: usize) -> std::io::Result<Vec<u8>>;
    /// Append one downloaded record.
    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn close(&mut self) {}
}

/// IND$FILE state machine: IDLE/OPEN plus the data-vs-MSG
/// distinction the reference implementation keys off the opened file name.
pub struct DdmEngine {
    state: State,
    direction: Direction,
    /// `true` when the open file name was `FT:DATA` (a record transfer);
    /// `false` means the next `Data-To-Insert` carries the transfer's
    /// closing MSG text and ends the session.
    data_mode: bool,
    record_num: u32,
    limin: u16,
    text_mode: bool,
    pending_upload: Option<Vec<u8>>,
    /// The full inbound record (AID byte included) last handed back for a
    /// `Get`; an `RM` arriving before the next real `Get` resends this
    /// verbatim rather than rebuilding a screen-state AID record, per the
    /// "DDM re-send behavior" design note.
    last_get_reply: Option<Vec<u8>>,
    /// The MSG text captured at the end of the last transfer; surfaced to
    /// the caller as the transfer's user-visible result.
    last_message: Option<String>,
}

impl DdmEngine {
    pub fn new(limin: u16, text_mode: bool) -> Self {
        Self {
            state: State::Idle,
            direction: Direction::Download,
            data_mode: false,
            record_num: 0,
            limin,
            text_mode,
            pending_upload: None,
            last_get_reply: None,
            last_message: None,
        }
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    /// The last `Get` reply sent, if a transfer is still in progress; an
    /// `RM` received while this is set should resend it instead of
    /// building a fresh screen-state AID record. The record counter is
    /// not advanced by a resend.
    pub fn pending_get_reply(&self) -> Option<&[u8]> {
        if self.is_open() {
            self.last_get_reply.as_deref()
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open)
    }

    /// Process one DDM structured field, returning the inbound record to
    /// send (leading AID byte included), if any.
    pub fn process(
        &mut self,
        field: &StructuredField,
        codecs: &CodecRegistry,
        sink: &mut dyn TransferSink,
    ) -> Result<Option<Vec<u8>>> {
        if field.id != SFID_DDM {
            return Err(Error::ProtocolViolation {
                detail: format!("ddm engine got non-DDM structured field 0x{:02X}", field.id),
            });
        }
        let opcode = [
            *field.data.first().ok_or_else(|| Error::ProtocolViolation { detail: "empty DDM field".into() })?,
            *field.data.get(1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated DDM opcode".into() })?,
        ];
        match opcode {
            OP_OPEN => self.handle_open(&field.data, codecs, sink),
            OP_SET_CURSOR => Ok(self.handle_set_cursor(&field.data)),
            OP_GET => self.handle_get(sink, codecs).map(Some),
            OP_INSERT => Ok(self.handle_insert_request()),
            OP_DATA_TO_INSERT => self.handle_data_to_insert(&field.data, codecs, sink).map(Some),
            OP_CLOSE => Ok(Some(self.handle_close(sink))),
            other => Err(Error::ProtocolViolation {
                detail: format!("unknown DDM opcode {:02X}{:02X}", other[0], other[1]),
            }),
        }
    }

    fn handle_open(&mut self, data: &[u8], codecs: &CodecRegistry, sink: &mut dyn TransferSink) -> Result<Option<Vec<u8>>> {
        // `data` starts with the 2 opcode bytes; offsets below are counted
        // from the SFID byte (as the reference implementation counts
        // them), so `data[n-1]` here matches its `b_str[start+n]`.
        if data.len() < 32 {
            return Err(Error::ProtocolViolation { detail: "DDM Open needs 35 bytes".into() });
        }
        let upload = data[13] == 1;
        let ft_bytes: &[u8] = match data[25] {
            3 => &data[27..34],
            8 if data.len() >= 40 => &data[33..40],
            _ => return Ok(Some(self.reply(error_sf(OP_OPEN_ERR, EC_OPEN_FAILED)))),
        };
        let ft_str: String = ft_bytes.iter().map(|&b| b as char).collect();

        if sink.open(&ft_str, upload).is_err() {
            return Ok(Some(self.reply(error_sf(OP_OPEN_ERR, EC_OPEN_FAILED))));
        }

        self.state = State::Open;
        self.direction = if upload { Direction::Upload } else { Direction::Download };
        self.data_mode = ft_str == "FT:DATA";
        self.record_num = 0;
        self.pending_upload = None;
        self.last_get_reply = None;

        if upload {
            // Prefetch the first record so file I/O overlaps the next
            // round-trip instead of happening on the Get's critical path.
            self.prefetch_translated(sink, codecs);
        }

        Ok(Some(self.reply(ok_sf(OP_OPEN_ACK))))
    }

    fn handle_set_cursor(&mut self, _data: &[u8]) -> Option<Vec<u8>> {
        if !self.is_open() {
            return Some(self.reply(error_sf(OP_SET_CURSOR_ERR, EC_SYNTAX)));
        }
        None
    }

    fn handle_get(&mut self, sink: &mut dyn TransferSink, codecs: &CodecRegistry) -> Result<Vec<u8>> {
        if !self.is_open() || self.direction != Direction::Upload {
            return Ok(self.reply(error_sf(OP_GET_ERR, EC_SYNTAX)));
        }
        match self.pending_upload.take() {
            None => Ok(self.reply(error_sf(OP_GET_ERR, EC_PAST_EOF))),
            Some(prebuilt) => {
                let mut rec = vec![Aid::StructuredField.to_byte()];
                rec.extend(prebuilt);
                self.last_get_reply = Some(rec.clone());
                self.prefetch_translated(sink, codecs);
                Ok(rec)
            }
        }
    }

    fn prefetch_translated(&mut self, sink: &mut dyn TransferSink, codecs: &CodecRegistry) {
        self.record_num += 1;
        let overhead = 9 + 2 + 2; // D0 46 05 63 06 <rec#4> C0 80 61 + len(2) + outer len(2)
        let max_len = (self.limin as usize).saturating_sub(overhead);
        let raw = match sink.read_chunk(max_len) {
            Ok(bytes) => bytes,
            Err(_) => Vec::new(),
        };
        if raw.is_empty() {
            self.pending_upload = None;
            return;
        }
        let payload = if self.text_mode { translate_upload(&raw, codecs) } else { raw };

        let mut isf = vec![0xD0, OP_GET_DATA[0], OP_GET_DATA[1], 0x63, 0x06];
        isf.extend(self.record_num.to_be_bytes());
        isf.extend([0xC0, 0x80, 0x61]);
        isf.extend(((payload.len() + 5) as u16).to_be_bytes());
        isf.extend(payload);
        let mut out = ((isf.len() + 2) as u16).to_be_bytes().to_vec();
        out.extend(isf);
        self.pending_upload = Some(out);
    }

    fn handle_insert_request(&mut self) -> Option<Vec<u8>> {
        if !self.is_open() {
            return Some(self.reply(error_sf(OP_INSERT_ERR, EC_SYNTAX)));
        }
        None
    }

    fn handle_data_to_insert(
        &mut self,
        data: &[u8],
        codecs: &CodecRegistry,
        sink: &mut dyn TransferSink,
    ) -> Result<Vec<u8>> {
        if data.len() < 8 {
            return Err(Error::ProtocolViolation { detail: "DDM Data-To-Insert needs 11 bytes".into() });
        }
        if !self.is_open() {
            return Ok(self.reply(error_sf(OP_INSERT_ERR, EC_SYNTAX)));
        }

        let datalen = u16::from_be_bytes([data[6], data[7]]) as usize;
        if datalen <= 5 {
            return Err(Error::ProtocolViolation { detail: "DDM data length is bad".into() });
        }
        let payload_len = datalen - 5;
        let payload = data.get(8..8 + payload_len).ok_or_else(|| Error::ProtocolViolation {
            detail: "DDM data length is inconsistent".into(),
        })?;

        self.record_num += 1;
        let mut ack = vec![0xD0, OP_DATA_ACK[0], OP_DATA_ACK[1], 0x63, 0x06];
        ack.extend(self.record_num.to_be_bytes());
        let mut out = ((ack.len() + 2) as u16).to_be_bytes().to_vec();
        out.extend(ack);

        if self.data_mode {
            let translated = if self.text_mode { translate_download(payload, codecs) } else { payload.to_vec() };
            let _ = sink.write_chunk(&translated);
        } else {
            self.last_message = Some(decode_latin1(strip_eof_marker(payload)));
            self.state = State::Idle;
        }

        Ok(self.reply(out))
    }

    fn handle_close(&mut self, sink: &mut dyn TransferSink) -> Vec<u8> {
        sink.close();
        self.state = State::Idle;
        self.pending_upload = None;
        self.last_get_reply = None;
        self.reply(ok_sf(OP_CLOSE_ACK))
    }

    fn reply(&self, sf: Vec<u8>) -> Vec<u8> {
        let mut rec = vec![Aid::StructuredField.to_byte()];
        rec.extend(sf);
        rec
    }
}

fn ok_sf(opcode: [u8; 2]) -> Vec<u8> {
    let isf = vec![0xD0, opcode[0], opcode[1]];
    let mut out = ((isf.len() + 2) as u16).to_be_bytes().to_vec();
    out.extend(isf);
    out
}

fn error_sf(opcode: [u8; 2], code: [u8; 2]) -> Vec<u8> {
    let isf = vec![0xD0, opcode[0], opcode[1], 0x69, 0x04, code[0], code[1]];
    let mut out = ((isf.len() + 2) as u16).to_be_bytes().to_vec();
    out.extend(isf);
    out
}

fn strip_eof_marker(payload: &[u8]) -> &[u8] {
    match payload.last() {
        Some(0x1A) => &payload[..payload.len() - 1],
        _ => payload,
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Download (host -> client) translation: strip the EOF marker and
/// embedded LFs, decode with the session codec, then fold CR into LF for
/// universal line endings.
fn translate_download(payload: &[u8], codecs: &CodecRegistry) -> Vec<u8> {
    let trimmed = strip_eof_marker(payload);
    let filtered: Vec<u8> = trimmed.iter().copied().filter(|&b| b != 0x0A).collect();
    let decoded: String = filtered.iter().map(|&b| codecs.decode(b, 0)).collect();
    decoded.replace('\r', "\n").into_bytes()
}

/// Upload (client -> host) translation: LF becomes CR, encode with the
/// session codec, then re-insert an LF byte after each CR to form CRLF
/// record terminators.
fn translate_upload(raw: &[u8], codecs: &CodecRegistry) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw).replace('\n', "\r");
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if let Some((b, _)) = codecs.encode(ch) {
            out.push(b);
            if ch == '\r' {
                out.push(codecs.encode('\n').map(|(b, _)| b).unwrap_or(0x0A));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemorySink {
        opened_name: Option<String>,
        upload: bool,
        source: Vec<u8>,
        read_pos: usize,
        written: Vec<u8>,
        closed: bool,
    }

    impl TransferSink for MemorySink {
        fn open(&mut self, name: &str, upload: bool) -> std::io::Result<()> {
            self.opened_name = Some(name.to_string());
            self.upload = upload;
            Ok(())
        }
        fn read_chunk(&mut self, max_len: usize) -> std::io::Result<Vec<u8>> {
            let end = (self.read_pos + max_len).min(self.source.len());
            let chunk = self.source[self.read_pos..end].to_vec();
            self.read_pos = end;
            Ok(chunk)
        }
        fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }
        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn open_field(upload: bool, ft_data: bool) -> StructuredField {
        let mut data = vec![0u8; 35];
        data[0] = OP_OPEN[0];
        data[1] = OP_OPEN[1];
        data[13] = if upload { 1 } else { 0 };
        data[25] = 3;
        let name = if ft_data { b"FT:DATA".as_slice() } else { b"FT:MSG!".as_slice() };
        data[27..34].copy_from_slice(name);
        StructuredField { id: SFID_DDM, data }
    }

    #[test]
    fn open_for_download_acks_and_enters_open_state() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        let reply = engine.process(&open_field(false, true), &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(reply[0], Aid::StructuredField.to_byte());
        assert_eq!(&reply[3..6], &[0xD0, 0x00, 0x09]);
        assert!(engine.is_open());
        assert_eq!(sink.opened_name.as_deref(), Some("FT:DATA"));
    }

    #[test]
    fn open_with_unknown_size_flag_is_open_failed() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        let mut field = open_field(false, true);
        field.data[25] = 0xFF;
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(&reply[3..8], &[0xD0, 0x00, 0x08, 0x69, 0x04]);
        assert_eq!(&reply[8..10], &[0x01, 0x00]);
        assert!(!engine.is_open());
    }

    #[test]
    fn data_to_insert_before_open_is_syntax_error() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        let field = StructuredField { id: SFID_DDM, data: vec![0x47, 0x04, 0, 0, 0, 0, 0, 11] };
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(&reply[3..8], &[0xD0, 0x47, 0x08, 0x69, 0x04]);
        assert_eq!(&reply[8..10], &[0x60, 0x00]);
    }

    #[test]
    fn data_to_insert_writes_payload_and_acks_record_number() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        engine.process(&open_field(false, true), &codecs, &mut sink).unwrap();

        let payload = vec![0xC1u8, 0xC2, 0xC3]; // EBCDIC "ABC"
        let mut data = vec![0x47, 0x04, 0xC0, 0x80, 0x61];
        data.extend(((payload.len() + 5) as u16).to_be_bytes());
        data.extend(&payload);
        let field = StructuredField { id: SFID_DDM, data };
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();

        assert_eq!(&reply[3..8], &[0xD0, 0x47, 0x05, 0x63, 0x06]);
        let recnum = u32::from_be_bytes([reply[8], reply[9], reply[10], reply[11]]);
        assert_eq!(recnum, 1);
        assert_eq!(sink.written, payload);
        assert!(engine.is_open());
    }

    #[test]
    fn data_to_insert_msg_mode_closes_and_captures_message() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        engine.process(&open_field(false, false), &codecs, &mut sink).unwrap();

        let payload = b"transfer complete".to_vec();
        let mut data = vec![0x47, 0x04, 0xC0, 0x80, 0x61];
        data.extend(((payload.len() + 5) as u16).to_be_bytes());
        data.extend(&payload);
        let field = StructuredField { id: SFID_DDM, data };
        engine.process(&field, &codecs, &mut sink).unwrap();

        assert!(!engine.is_open());
        assert_eq!(engine.last_message(), Some("transfer complete"));
    }

    #[test]
    fn get_without_pending_data_is_past_eof() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        engine.process(&open_field(true, true), &codecs, &mut sink).unwrap(); // empty source
        let field = StructuredField { id: SFID_DDM, data: vec![0x46, 0x11] };
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(&reply[3..8], &[0xD0, 0x46, 0x08, 0x69, 0x04]);
        assert_eq!(&reply[8..10], &[0x22, 0x00]);
    }

    #[test]
    fn get_returns_prefetched_record_and_advances() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink { source: vec![0xC1, 0xC2, 0xC3, 0xC4], ..Default::default() };
        let codecs = CodecRegistry::default();
        engine.process(&open_field(true, true), &codecs, &mut sink).unwrap();

        let field = StructuredField { id: SFID_DDM, data: vec![0x46, 0x11] };
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(&reply[3..6], &[0xD0, 0x46, 0x05]);
        let recnum = u32::from_be_bytes([reply[8], reply[9], reply[10], reply[11]]);
        assert_eq!(recnum, 1);
        assert_eq!(&reply[12..15], &[0xC0, 0x80, 0x61]);
    }

    #[test]
    fn pending_get_reply_tracks_last_get_until_closed() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink { source: vec![0xC1, 0xC2, 0xC3, 0xC4], ..Default::default() };
        let codecs = CodecRegistry::default();
        assert!(engine.pending_get_reply().is_none());

        engine.process(&open_field(true, true), &codecs, &mut sink).unwrap();
        assert!(engine.pending_get_reply().is_none()); // nothing served yet

        let get_field = StructuredField { id: SFID_DDM, data: vec![0x46, 0x11] };
        let reply = engine.process(&get_field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(engine.pending_get_reply(), Some(reply.as_slice()));

        let close_field = StructuredField { id: SFID_DDM, data: vec![0x41, 0x12] };
        engine.process(&close_field, &codecs, &mut sink).unwrap();
        assert!(engine.pending_get_reply().is_none());
    }

    #[test]
    fn close_acks_and_returns_to_idle() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        engine.process(&open_field(false, true), &codecs, &mut sink).unwrap();

        let field = StructuredField { id: SFID_DDM, data: vec![0x41, 0x12] };
        let reply = engine.process(&field, &codecs, &mut sink).unwrap().unwrap();
        assert_eq!(&reply[3..6], &[0xD0, 0x41, 0x09]);
        assert!(!engine.is_open());
        assert!(sink.closed);
    }

    #[test]
    fn unknown_opcode_is_protocol_violation() {
        let mut engine = DdmEngine::new(32639, false);
        let mut sink = MemorySink::default();
        let codecs = CodecRegistry::default();
        let field = StructuredField { id: SFID_DDM, data: vec![0x99, 0x99] };
        let err = engine.process(&field, &codecs, &mut sink).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }
}
