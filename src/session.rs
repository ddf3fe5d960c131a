//! Session: the consumer-facing handle.
//!
//! Wires the [`Runtime`], [`Framer`], [`Negotiator`], [`OutboundProcessor`],
//! [`Screen`], [`CodecRegistry`], and [`DdmEngine`] into the single
//! cooperative connect/wait/act loop. `Session` owns the
//! protocol engine directly: there is no async runtime and no background
//! thread, only the caller's own thread calling `wait`.

use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::codec::{CodePage, CodecRegistry};
use crate::codes::Aid;
use crate::config::{CodePageId, SessionConfig};
use crate::ddm::{DdmEngine, TransferSink};
use crate::error::{Error, Result};
use crate::inbound;
use crate::keyboard;
use crate::outbound::{Action, OutboundProcessor, StructuredField};
use crate::query_reply::{self, QueryReplyConfig};
use crate::runtime::{Runtime, WaitOutcome};
use crate::screen::{Screen, ScreenSize};
use crate::telnet::{self, Framer, TelnetEvent};
use crate::tn3270e::{self, Negotiator, RecordHeader, Tn3270eEvent};
use crate::traits::{NullObserver, ScreenObserver};
use crate::transport::Transport;

/// Read Partition structured-field id; its reply is built by the
/// query-reply engine rather than the outbound processor.
const SFID_READ_PARTITION: u8 = 0x01;
const SFID_DDM: u8 = 0xD0;
const RP_TYPE_QUERY: u8 = 0x02;
const RP_TYPE_QUERY_LIST: u8 = 0x03;

/// `AlwaysResponse` value of [`RecordHeader::response_flag`] (RFC 2355).
const TN3270E_ALWAYS_RESPONSE: u8 = 2;

/// A [`TransferSink`] backed by a single local file. The DDM Open message's
/// file name is the host's own bookkeeping marker (`FT:DATA` or a MSG
/// close); the local path is fixed by the caller before the transfer
/// starts, so `open` only needs to pick read-vs-write from `upload`.
struct FileSink {
    local_path: std::path::PathBuf,
    file: Option<std::fs::File>,
}

impl FileSink {
    fn new(local_path: impl Into<std::path::PathBuf>) -> Self {
        Self { local_path: local_path.into(), file: None }
    }
}

impl TransferSink for FileSink {
    fn open(&mut self, _name: &str, upload: bool) -> std::io::Result<()> {
        self.file = Some(if upload {
            std::fs::File::open(&self.local_path)?
        } else {
            std::fs::File::create(&self.local_path)?
        });
        Ok(())
    }

    fn read_chunk(&mut self, max_len: usize) -> std::io::Result<Vec<u8>> {
        let file = self.file.as_mut().ok_or_else(no_open_file)?;
        let mut buf = vec![0u8; max_len];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.as_mut().ok_or_else(no_open_file)?.write_all(data)
    }

    fn close(&mut self) {
        self.file = None;
    }
}

fn no_open_file() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "transfer sink not open")
}

/// The consumer-facing TN3270/TN3270E client engine.
pub struct Session {
    config: SessionConfig,
    runtime: Runtime,
    framer: Framer,
    negotiator: Negotiator,
    tn3270e_active: bool,
    eor_seen: bool,
    screen: Screen,
    outbound: OutboundProcessor,
    codecs: CodecRegistry,
    ddm: DdmEngine,
    query_cfg: QueryReplyConfig,
    transfer_sink: Option<Box<dyn TransferSink>>,
    observer: Box<dyn ScreenObserver>,
    connected: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let default_size = ScreenSize::new(24, 80);
        let alt_size = ScreenSize::new(config.alt_rows, config.alt_cols);
        let query_cfg = QueryReplyConfig {
            alt_cols: config.alt_cols as u16,
            alt_rows: config.alt_rows as u16,
            ..QueryReplyConfig::default()
        };
        let codecs = build_codecs(&config);
        Self {
            framer: Framer::new(config.use_tn3270e, config.terminal_type.clone()),
            negotiator: Negotiator::new(config.terminal_type.clone(), config.lu_name.clone()),
            tn3270e_active: false,
            eor_seen: false,
            screen: Screen::new(default_size, alt_size),
            outbound: OutboundProcessor::new(),
            ddm: DdmEngine::new(query_cfg.ddm_limin, true),
            query_cfg,
            codecs,
            transfer_sink: None,
            observer: Box::new(NullObserver),
            runtime: Runtime::new(),
            connected: false,
            config,
        }
    }

    /// Register the hook a UI collaborator uses to react to screen and
    /// keyboard-lock changes as they happen.
    pub fn set_observer(&mut self, observer: Box<dyn ScreenObserver>) {
        self.observer = observer;
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.runtime.is_lost()
    }

    /// Open the transport, optionally upgrade to TLS, and drive telnet /
    /// TN3270E negotiation to completion within `connect_timeout`.
    pub fn connect(&mut self) -> Result<()> {
        let mut transport =
            Transport::connect(&self.config.host, self.config.port, self.config.connect_timeout)?;
        transport.set_tls_policy(self.config.verify_cert, self.config.ca_bundle_path.clone());
        if self.config.secure {
            transport.upgrade_to_tls(&self.config.host)?;
        }
        self.runtime.attach(transport);
        self.framer = Framer::new(self.config.use_tn3270e, self.config.terminal_type.clone());
        self.negotiator = Negotiator::new(self.config.terminal_type.clone(), self.config.lu_name.clone());
        self.tn3270e_active = false;
        self.eor_seen = false;
        self.connected = true;

        let deadline = Instant::now() + self.config.connect_timeout;
        while !self.negotiation_settled() {
            if Instant::now() >= deadline {
                self.connected = false;
                return Err(Error::TransportLost {
                    reason: "timed out negotiating telnet options".into(),
                });
            }
            if self.wait(self.config.read_timeout)? == WaitOutcome::Lost {
                return Err(Error::TransportLost {
                    reason: "connection closed during negotiation".into(),
                });
            }
        }
        info!("session: connected to {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    fn negotiation_settled(&self) -> bool {
        self.eor_seen && (!self.config.use_tn3270e || self.tn3270e_active)
    }

    /// Idempotent close; aborts any in-flight `wait` or `connect`.
    pub fn close(&mut self) {
        self.runtime.close();
        self.connected = false;
    }

    /// Block until data arrives, `timeout` elapses, the connection is lost,
    /// or a wake signal is posted. Protocol violations surface here
    /// rather than being swallowed.
    pub fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let outcome = self.runtime.wait(timeout)?;
        match outcome {
            WaitOutcome::DataReady => {
                let bytes = self.runtime.take_pending();
                if let Err(e) = self.feed_bytes(&bytes) {
                    warn!("session: {e}, marking session lost");
                    self.runtime.mark_lost();
                    self.connected = false;
                    return Err(e);
                }
            }
            WaitOutcome::Lost => self.connected = false,
            WaitOutcome::TimedOut | WaitOutcome::Woken => {}
        }
        Ok(outcome)
    }

    fn feed_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let (events, responses) = self.framer.feed(bytes);
        if !responses.is_empty() {
            self.runtime.send(&responses)?;
        }
        for event in events {
            self.handle_telnet_event(event)?;
        }
        Ok(())
    }

    fn handle_telnet_event(&mut self, event: TelnetEvent) -> Result<()> {
        match event {
            TelnetEvent::Record(record) => self.handle_inbound_record(record)?,
            TelnetEvent::Command(_) => {}
            TelnetEvent::OptionSignal { verb, option } => {
                if option == telnet::OPT_END_OF_RECORD {
                    self.eor_seen = true;
                }
                if self.framer.wants_tls_upgrade(option, verb) {
                    if let Some(transport) = self.runtime.transport() {
                        transport.upgrade_to_tls(&self.config.host)?;
                        info!("session: upgraded to TLS via STARTTLS");
                    }
                }
            }
            TelnetEvent::Subnegotiation { option, data } => {
                if option == tn3270e::OPT_TN3270E {
                    let (response, event) = self.negotiator.process_subnegotiation(&data);
                    if !response.is_empty() {
                        self.runtime.send(&response)?;
                    }
                    if let Tn3270eEvent::Negotiated { device_type, lu_name } = event {
                        self.tn3270e_active = true;
                        info!("session: tn3270e negotiated, device={device_type} lu={lu_name:?}");
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_inbound_record(&mut self, record: Vec<u8>) -> Result<()> {
        let mut respond_seq: Option<u16> = None;
        let payload: Vec<u8> = if self.tn3270e_active {
            let Some((header, payload)) = RecordHeader::parse(&record) else {
                warn!("session: TN3270E record shorter than its 5-byte header, dropping");
                return Ok(());
            };
            if header.response_flag == TN3270E_ALWAYS_RESPONSE {
                respond_seq = Some(header.seq_no);
            }
            payload.to_vec()
        } else {
            record
        };

        let action = self.outbound.process_record(&payload, &mut self.screen, self.observer.as_mut())?;
        self.handle_action(action)?;

        // Side effects of `action` must land before the acknowledgment.
        if let Some(seq) = respond_seq {
            let framed = Framer::encode_record(&RecordHeader::response_record(seq));
            self.runtime.send(&framed)?;
        }
        Ok(())
    }

    fn handle_action(&mut self, action: Action) -> Result<()> {
        match action {
            Action::None => Ok(()),
            Action::BuildAndSendInbound => {
                if let Some(pending) = self.ddm.pending_get_reply() {
                    // RM while a DDM Get reply is outstanding resends it
                    // verbatim rather than rebuilding a screen-state AID
                    // record; the record counter does not advance.
                    return self.send_inbound(pending.to_vec());
                }
                let aid = self.outbound.interaction.aid;
                let rec = inbound::send_aid(aid, &self.screen, &mut self.outbound, &self.codecs);
                self.send_inbound(rec)
            }
            Action::Resend(bytes) => self.send_inbound(bytes),
            Action::BuildReadBuffer => {
                let aid = self.outbound.interaction.aid;
                let rec = inbound::build_read_buffer(&self.screen, &self.outbound, aid);
                self.outbound.record_sent_inbound(rec.clone());
                self.send_inbound(rec)
            }
            Action::StructuredFields(fields) => {
                for field in fields {
                    self.dispatch_structured_field(field)?;
                }
                Ok(())
            }
        }
    }

    fn dispatch_structured_field(&mut self, field: StructuredField) -> Result<()> {
        match field.id {
            SFID_READ_PARTITION => self.handle_read_partition(&field.data),
            SFID_DDM => match self.transfer_sink.as_mut() {
                Some(sink) => {
                    if let Some(rec) = self.ddm.process(&field, &self.codecs, sink.as_mut())? {
                        self.send_inbound(rec)?;
                    }
                    Ok(())
                }
                None => {
                    warn!("session: DDM structured field received with no active transfer, ignoring");
                    Ok(())
                }
            },
            other => {
                warn!("session: unhandled structured field id 0x{other:02X}");
                Ok(())
            }
        }
    }

    /// `data` = `[partition_id, type, request_type?, qcode...]`, stripped of
    /// the SFID byte by `split_structured_fields`.
    fn handle_read_partition(&mut self, data: &[u8]) -> Result<()> {
        let &ptype = data.get(1).ok_or_else(|| Error::ProtocolViolation {
            detail: "truncated Read Partition structured field".into(),
        })?;
        self.outbound.enter_read_partition();
        let reply = match ptype {
            RP_TYPE_QUERY => query_reply::build_query_reply(&self.query_cfg),
            RP_TYPE_QUERY_LIST => {
                let qcodes = data.get(3..).unwrap_or(&[]);
                query_reply::build_query_list_reply(&self.query_cfg, qcodes)
            }
            other => {
                warn!("session: unsupported Read Partition type 0x{other:02X}, answering Query");
                query_reply::build_query_reply(&self.query_cfg)
            }
        };
        self.outbound.record_sent_inbound(reply.clone());
        self.send_inbound(reply)
    }

    fn send_inbound(&mut self, payload: Vec<u8>) -> Result<()> {
        let wire = if self.tn3270e_active { RecordHeader::wrap_outbound(&payload) } else { payload };
        let framed = Framer::encode_record(&wire);
        self.runtime.send(&framed)
    }

    fn send_aid(&mut self, aid: Aid) -> Result<()> {
        let rec = inbound::send_aid(aid, &self.screen, &mut self.outbound, &self.codecs);
        self.send_inbound(rec)
    }

    // -- Screen read --------------------------------------------------

    pub fn screen_string(&self, start: usize, end: usize, rstrip: bool) -> String {
        self.screen.scrstr(start, end, rstrip, &self.codecs)
    }

    pub fn fields(&self) -> Vec<(usize, u8)> {
        self.screen.fields()
    }

    pub fn char_addrs(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        self.screen.char_addrs(start, end)
    }

    pub fn field(&self, addr: usize) -> (isize, u8) {
        self.screen.field(addr)
    }

    pub fn is_protected(&self, addr: usize) -> bool {
        self.screen.is_protected(addr)
    }

    pub fn cursor_address(&self) -> usize {
        self.screen.curadd
    }

    // -- Keyboard: AID keys --------------------------------------------

    pub fn enter(&mut self) -> Result<()> {
        self.send_aid(Aid::Enter)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.send_aid(Aid::Clear)
    }

    pub fn pa1(&mut self) -> Result<()> {
        self.send_aid(Aid::Pa1)
    }

    pub fn pa2(&mut self) -> Result<()> {
        self.send_aid(Aid::Pa2)
    }

    pub fn pa3(&mut self) -> Result<()> {
        self.send_aid(Aid::Pa3)
    }

    pub fn pf(&mut self, n: u8) -> Result<()> {
        if !(1..=24).contains(&n) {
            return Err(Error::ProtocolViolation { detail: format!("PF key {n} out of range 1..=24") });
        }
        self.send_aid(Aid::Pf(n))
    }

    /// Attention: a Telnet `IP` (Interrupt Process), not a data-stream AID.
    pub fn attn(&mut self) -> Result<()> {
        self.runtime.send(&[telnet::IAC, telnet::IP])
    }

    // -- Keyboard: cursor and editing --------------------------------

    pub fn cursor_left(&mut self) -> Result<()> {
        keyboard::cursor_left(&mut self.screen, &self.outbound)
    }

    pub fn cursor_right(&mut self) -> Result<()> {
        keyboard::cursor_right(&mut self.screen, &self.outbound)
    }

    pub fn cursor_up(&mut self) -> Result<()> {
        keyboard::cursor_up(&mut self.screen, &self.outbound)
    }

    pub fn cursor_down(&mut self) -> Result<()> {
        keyboard::cursor_down(&mut self.screen, &self.outbound)
    }

    pub fn tab(&mut self) -> Result<()> {
        keyboard::tab(&mut self.screen, &self.outbound)
    }

    pub fn backtab(&mut self) -> Result<()> {
        keyboard::backtab(&mut self.screen, &self.outbound)
    }

    pub fn home(&mut self) -> Result<()> {
        keyboard::home(&mut self.screen, &self.outbound)
    }

    pub fn end(&mut self) -> Result<()> {
        keyboard::end(&mut self.screen, &self.outbound)
    }

    pub fn delete(&mut self) -> Result<()> {
        keyboard::delete(&mut self.screen, &self.outbound, self.observer.as_mut())
    }

    pub fn backspace(&mut self) -> Result<()> {
        keyboard::backspace(&mut self.screen, &self.outbound, self.observer.as_mut())
    }

    pub fn erase_eof(&mut self) -> Result<()> {
        keyboard::erase_eof(&mut self.screen, &self.outbound, self.observer.as_mut())
    }

    pub fn erase_input(&mut self) -> Result<()> {
        keyboard::erase_input(&mut self.screen, &self.outbound, self.observer.as_mut())
    }

    pub fn word_left(&mut self) -> Result<()> {
        keyboard::word_left(&mut self.screen, &self.outbound, &self.codecs)
    }

    pub fn word_right(&mut self) -> Result<()> {
        keyboard::word_right(&mut self.screen, &self.outbound, &self.codecs)
    }

    pub fn key_data(&mut self, text: &str, insert: bool) -> Result<()> {
        keyboard::key_data(text, insert, &mut self.screen, &self.outbound, &self.codecs, self.observer.as_mut())
    }

    pub fn paste(&mut self, text: &str) -> Result<()> {
        keyboard::paste(text, &mut self.screen, &self.outbound, &self.codecs, self.observer.as_mut())
    }

    // -- File transfer -------------------------------------------

    /// Fetch `host_params` (the IND$FILE argument string, e.g.
    /// `"HOST.FILE LOCAL.TXT (ASCII CRLF"`) into `local_path`.
    pub fn get_file(&mut self, local_path: &Path, host_params: &str, timeout: Duration) -> Result<String> {
        self.run_transfer(local_path, &format!("IND$FILE GET {host_params}"), timeout)
    }

    /// Send `local_path` to the host via an IND$FILE `PUT` command.
    pub fn put_file(&mut self, local_path: &Path, host_params: &str, timeout: Duration) -> Result<String> {
        self.run_transfer(local_path, &format!("IND$FILE PUT {host_params}"), timeout)
    }

    fn run_transfer(&mut self, local_path: &Path, command: &str, timeout: Duration) -> Result<String> {
        self.transfer_sink = Some(Box::new(FileSink::new(local_path)));
        self.ddm = DdmEngine::new(self.query_cfg.ddm_limin, true);

        self.screen.curadd = self.screen.first_unprotected_position();
        self.key_data(command, false)?;
        self.enter()?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.ddm.last_message().is_some() {
                break;
            }
            if !self.is_connected() {
                self.transfer_sink = None;
                return Err(Error::TransportLost { reason: "session lost during file transfer".into() });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.transfer_sink = None;
                return Err(Error::ProtocolViolation { detail: "file transfer timed out".into() });
            }
            self.wait(remaining.min(Duration::from_millis(500)))?;
        }

        self.transfer_sink = None;
        let message = self.ddm.last_message().unwrap_or("").to_string();
        if message.to_ascii_uppercase().contains("ERROR") {
            Err(Error::FileTransferError { message })
        } else {
            Ok(message)
        }
    }
}

fn build_codecs(config: &SessionConfig) -> CodecRegistry {
    let primary = code_page_for(config.encoding.0);
    if config.encoding.1 != config.encoding.0 {
        CodecRegistry::with_alternate(primary, code_page_for(config.encoding.1))
    } else {
        CodecRegistry::new(primary)
    }
}

/// Only CP037 is implemented; other code-page ids fall back to it with a
/// warning rather than failing the session outright.
fn code_page_for(id: CodePageId) -> CodePage {
    if id != 37 {
        warn!("session: code page {id} has no table, falling back to CP037");
    }
    CodePage::cp037()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_disconnected() {
        let session = Session::new(SessionConfig::new("mainframe.example.com", true));
        assert!(!session.is_connected());
    }

    #[test]
    fn pf_key_out_of_range_is_rejected() {
        let mut session = Session::new(SessionConfig::new("mainframe.example.com", false));
        let err = session.pf(25).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn screen_string_reads_default_sized_buffer() {
        let session = Session::new(SessionConfig::new("mainframe.example.com", false));
        assert_eq!(session.screen_string(0, 0, false).len(), 24 * 80);
    }

    #[test]
    fn build_codecs_falls_back_to_cp037_for_unknown_page() {
        let mut cfg = SessionConfig::new("h", false);
        cfg.encoding = (500, 500);
        let registry = build_codecs(&cfg);
        assert_eq!(registry.decode(0xC8, 0), 'H');
    }

    #[test]
    fn negotiation_settled_waits_for_tn3270e_when_enabled() {
        let mut session = Session::new(SessionConfig::new("h", false));
        session.eor_seen = true;
        assert!(!session.negotiation_settled());
        session.tn3270e_active = true;
        assert!(session.negotiation_settled());
    }
}
