//! Outbound Processor (C6): decodes host-to-terminal 3270 commands and the
//! orders embedded in a `W`/`EW`/`EWA` data stream, mutating the [`Screen`].
//!
//! "Outbound" follows the wire's own naming (host -> terminal); this is the
//! component the rest of the crate leans on hardest, so its state doubles as
//! the read-state machine and running character-attribute registers that
//! the keyboard engine and inbound builder also consult.

use log::debug;

use crate::addressing::{bit6, decode_address};
use crate::codes::{
    Aid, CMD_EAU, CMD_EAU_SHORT, CMD_EW, CMD_EWA, CMD_EWA_SHORT, CMD_EW_SHORT,
    CMD_RB, CMD_RB_SHORT, CMD_RM, CMD_RMA, CMD_RM_SHORT, CMD_W, CMD_WSF, CMD_WSF_SHORT, CMD_W_SHORT,
    ORDER_EUA, ORDER_GE, ORDER_IC, ORDER_MF, ORDER_PT, ORDER_RA, ORDER_SA, ORDER_SBA, ORDER_SF,
    ORDER_SFE, WCC_ALARM, WCC_RESET_MDT, WCC_RESET_PARTITION, WCC_RESTORE_KEYBOARD, XA_BACKGROUND,
    XA_CHARSET, XA_FIELD_ATTRIBUTE, XA_FOREGROUND, XA_HIGHLIGHT,
};
use crate::error::{Error, Result};
use crate::screen::Screen;
use crate::traits::ScreenObserver;

/// Set-Reply-Mode structured field, handled inline since reply mode is
/// core write-side state.
const SFID_SET_REPLY_MODE: u8 = 0x09;
/// Outbound 3270DS structured field: a partition id, a command byte, and
/// that command's own data, nested inside a `WSF`.
const SFID_OUTBOUND_3270DS: u8 = 0x40;

/// One structured field extracted from a `WSF` record, still addressed to
/// a specific SFID for the caller to route (Read Partition -> C9, DDM ->
/// C10; everything else this module does not own).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredField {
    pub id: u8,
    pub data: Vec<u8>,
}

/// What the caller (the [`Session`](crate::session::Session)) should do
/// after a record has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing further needed; the record's side effects are already
    /// applied to the screen.
    None,
    /// Build a fresh AID inbound record with the current AID and send it.
    BuildAndSendInbound,
    /// Re-send these exact bytes (read-state RREAD resend).
    Resend(Vec<u8>),
    /// Build and send a Read-Buffer reply.
    BuildReadBuffer,
    /// Structured fields not owned by this component, in arrival order.
    StructuredFields(Vec<StructuredField>),
}

/// Read-state machine driving RM/RMA resend behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Normal,
    Renter,
    Rread,
}

/// Keyboard-lock and AID bookkeeping shared with the keyboard engine and
/// inbound builder.
#[derive(Debug, Clone)]
pub struct InteractionState {
    pub pwait: bool,
    pub system_lock_wait: bool,
    pub aid: Aid,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self { pwait: false, system_lock_wait: false, aid: Aid::None }
    }
}

/// The outbound (host -> terminal) data-stream processor.
pub struct OutboundProcessor {
    pub interaction: InteractionState,
    pub read_state: ReadState,
    /// Reply mode selected by the last Set-Reply-Mode SF: 0 Field, 1
    /// Extended Field, 2 Character.
    pub reply_mode: u8,
    /// Attribute types (subset of `{0x41, 0x42, 0x45}`) the host asked the
    /// inbound builder to report in Character reply mode.
    pub reply_cattrs: Vec<u8>,
    /// Running character-attribute registers applied to data bytes as
    /// they're written (`SA` order).
    proc_eh: u8,
    proc_fg: u8,
    proc_cs: u8,
    proc_bg: u8,
    /// Set by any data byte written since the last buffer-address jump;
    /// consumed (and cleared) by the next `PT` order.
    pt_erase: bool,
    /// Force 14-bit addressing (negotiated out-of-band); see .
    pub force_14bit: bool,
    last_inbound: Option<Vec<u8>>,
}

impl OutboundProcessor {
    pub fn new() -> Self {
        Self {
            interaction: InteractionState::default(),
            read_state: ReadState::Normal,
            reply_mode: 0,
            reply_cattrs: Vec::new(),
            proc_eh: 0,
            proc_fg: 0,
            proc_cs: 0,
            proc_bg: 0,
            pt_erase: false,
            force_14bit: false,
            last_inbound: None,
        }
    }

    /// Record the bytes of an inbound record just sent, for RREAD resend.
    pub fn record_sent_inbound(&mut self, bytes: Vec<u8>) {
        self.last_inbound = Some(bytes);
    }

    /// Called when the keyboard engine transmits an AID: advances
    /// NORMAL -> RENTER.
    pub fn on_aid_sent(&mut self, aid: Aid) {
        self.interaction.aid = aid;
        if matches!(self.read_state, ReadState::Normal) {
            self.read_state = ReadState::Renter;
        }
    }

    /// Called by the query-reply engine when dispatching Read Partition.
    pub fn enter_read_partition(&mut self) {
        self.read_state = ReadState::Rread;
    }

    /// Process one complete inbound 3270 record (the telnet/TN3270E layers
    /// have already stripped framing).
    pub fn process_record(
        &mut self,
        record: &[u8],
        screen: &mut Screen,
        observer: &mut dyn ScreenObserver,
    ) -> Result<Action> {
        let (&cmd, rest) = record.split_first().ok_or_else(|| Error::ProtocolViolation {
            detail: "empty 3270 record".into(),
        })?;
        match cmd {
            CMD_W | CMD_W_SHORT => {
                self.do_write(rest, screen, observer)?;
                Ok(Action::None)
            }
            CMD_EW | CMD_EW_SHORT => {
                screen.erase(false);
                observer.on_erase();
                self.reset_write_state();
                self.do_write(rest, screen, observer)?;
                Ok(Action::None)
            }
            CMD_EWA | CMD_EWA_SHORT => {
                screen.erase(true);
                observer.on_erase();
                self.reset_write_state();
                self.do_write(rest, screen, observer)?;
                Ok(Action::None)
            }
            CMD_EAU | CMD_EAU_SHORT => {
                self.erase_all_unprotected(screen, observer);
                Ok(Action::None)
            }
            CMD_RM | CMD_RM_SHORT => Ok(self.handle_read_modified()),
            CMD_RMA => Ok(self.handle_read_modified()),
            CMD_RB | CMD_RB_SHORT => Ok(Action::BuildReadBuffer),
            CMD_WSF | CMD_WSF_SHORT => {
                let fields = self.split_structured_fields(rest)?;
                self.dispatch_inline_structured_fields(fields, screen, observer)
            }
            other => Err(Error::ProtocolViolation {
                detail: format!("unknown command byte 0x{other:02X}"),
            }),
        }
    }

    fn reset_write_state(&mut self) {
        self.interaction = InteractionState::default();
        self.read_state = ReadState::Normal;
        self.reply_mode = 0;
        self.reply_cattrs.clear();
        self.proc_eh = 0;
        self.proc_fg = 0;
        self.proc_cs = 0;
        self.proc_bg = 0;
        self.pt_erase = false;
    }

    fn handle_read_modified(&mut self) -> Action {
        match self.read_state {
            ReadState::Normal => Action::None,
            ReadState::Renter => {
                self.read_state = ReadState::Rread;
                Action::BuildAndSendInbound
            }
            ReadState::Rread => match &self.last_inbound {
                Some(bytes) => Action::Resend(bytes.clone()),
                None => Action::BuildAndSendInbound,
            },
        }
    }

    /// `W` body: `<wcc> <orders/data...>`. Invariant 5: `bufadd := curadd`.
    fn do_write(&mut self, data: &[u8], screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<()> {
        let (&wcc, orders) = data.split_first().ok_or_else(|| Error::ProtocolViolation {
            detail: "write command missing WCC byte".into(),
        })?;
        screen.bufadd = screen.curadd;
        if wcc & WCC_RESET_MDT != 0 {
            screen.reset_all_mdt();
        }
        self.process_orders(orders, screen, observer)?;
        if wcc & WCC_RESET_PARTITION != 0 {
            self.reply_mode = 0;
            self.reply_cattrs.clear();
        }
        if wcc & WCC_ALARM != 0 {
            debug!("outbound: WCC alarm bit set");
        }
        if wcc & WCC_RESTORE_KEYBOARD != 0 {
            self.interaction.pwait = false;
            self.interaction.system_lock_wait = false;
            self.interaction.aid = Aid::None;
            self.read_state = ReadState::Normal;
            observer.on_keylock_changed(false);
        }
        Ok(())
    }

    fn process_orders(&mut self, data: &[u8], screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<()> {
        let write_start = screen.bufadd;
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            i = match b {
                ORDER_SF => self.order_sf(data, i, screen, observer)?,
                ORDER_SFE => self.order_sfe(data, i, screen, observer)?,
                ORDER_MF => self.order_mf(data, i, screen, observer)?,
                ORDER_SBA => self.order_sba(data, i, screen)?,
                ORDER_IC => {
                    screen.curadd = screen.bufadd;
                    observer.on_cursor_changed(screen.curadd);
                    i + 1
                }
                ORDER_PT => {
                    self.order_pt(screen);
                    i + 1
                }
                ORDER_RA => self.order_ra(data, i, screen)?,
                ORDER_EUA => self.order_eua(data, i, screen)?,
                ORDER_GE => {
                    let byte = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation {
                        detail: "GE order missing data byte".into(),
                    })?;
                    self.write_data_byte(screen, byte, true);
                    i + 2
                }
                ORDER_SA => self.order_sa(data, i, screen)?,
                other => {
                    let _ = other;
                    self.write_data_byte(screen, b, false);
                    i + 1
                }
            };
        }
        observer.on_write(None, write_start, screen.bufadd);
        Ok(())
    }

    fn write_data_byte(&mut self, screen: &mut Screen, byte: u8, ge: bool) {
        let a = screen.bufadd;
        screen.dc[a] = byte;
        screen.fa[a] = 0;
        screen.eh[a] = self.proc_eh;
        screen.cs[a] = if ge { 1 } else { self.proc_cs };
        screen.fg[a] = self.proc_fg;
        screen.bg[a] = self.proc_bg;
        screen.bufadd = screen.advance(a, 1);
        self.pt_erase = true;
    }

    fn order_sf(&mut self, data: &[u8], i: usize, screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<usize> {
        let attr = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation {
            detail: "SF order missing attribute byte".into(),
        })?;
        let a = screen.bufadd;
        screen.fa[a] = bit6(attr);
        screen.eh[a] = 0;
        screen.fg[a] = 0;
        screen.cs[a] = 0;
        screen.bg[a] = 0;
        observer.on_field_defined(a);
        screen.bufadd = screen.advance(a, 1);
        self.pt_erase = false;
        Ok(i + 2)
    }

    fn order_sfe(&mut self, data: &[u8], i: usize, screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<usize> {
        let n = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation {
            detail: "SFE order missing pair count".into(),
        })? as usize;
        let mut j = i + 2;
        // No explicit field-attribute pair defaults to unprotected normal,
        // mirroring how a bare SF's implicit attribute behaves.
        let mut fa_val = 0x40u8;
        let (mut eh, mut fg, mut cs, mut bg) = (0u8, 0u8, 0u8, 0u8);
        for _ in 0..n {
            let t = *data.get(j).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SFE pair".into() })?;
            let v = *data.get(j + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SFE pair".into() })?;
            match t {
                XA_FIELD_ATTRIBUTE => fa_val = bit6(v),
                XA_HIGHLIGHT => eh = v,
                XA_FOREGROUND => {
                    fg = v;
                    self.note_extended_color(screen, observer);
                }
                XA_CHARSET => cs = v,
                XA_BACKGROUND => {
                    bg = v;
                    self.note_extended_color(screen, observer);
                }
                other => {
                    return Err(Error::ProtocolViolation {
                        detail: format!("SFE unknown attribute type 0x{other:02X}"),
                    })
                }
            }
            j += 2;
        }
        let a = screen.bufadd;
        screen.fa[a] = fa_val;
        screen.eh[a] = eh;
        screen.fg[a] = fg;
        screen.cs[a] = cs;
        screen.bg[a] = bg;
        observer.on_field_defined(a);
        screen.bufadd = screen.advance(a, 1);
        self.pt_erase = false;
        Ok(j)
    }

    fn order_mf(&mut self, data: &[u8], i: usize, screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<usize> {
        let n = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation {
            detail: "MF order missing pair count".into(),
        })? as usize;
        let mut j = i + 2;
        let (field_addr, _) = screen.field(screen.bufadd);
        for _ in 0..n {
            let t = *data.get(j).ok_or_else(|| Error::ProtocolViolation { detail: "truncated MF pair".into() })?;
            let v = *data.get(j + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated MF pair".into() })?;
            if field_addr >= 0 {
                let a = field_addr as usize;
                match t {
                    XA_FIELD_ATTRIBUTE => screen.fa[a] = bit6(v),
                    XA_HIGHLIGHT => screen.eh[a] = v,
                    XA_FOREGROUND => {
                        screen.fg[a] = v;
                        self.note_extended_color(screen, observer);
                    }
                    XA_CHARSET => screen.cs[a] = v,
                    XA_BACKGROUND => {
                        screen.bg[a] = v;
                        self.note_extended_color(screen, observer);
                    }
                    other => {
                        return Err(Error::ProtocolViolation {
                            detail: format!("MF unknown attribute type 0x{other:02X}"),
                        })
                    }
                }
            }
            j += 2;
        }
        Ok(j)
    }

    fn order_sba(&mut self, data: &[u8], i: usize, screen: &mut Screen) -> Result<usize> {
        let b0 = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SBA".into() })?;
        let b1 = *data.get(i + 2).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SBA".into() })?;
        screen.bufadd = decode_address(b0, b1, screen.buffer_size(), self.force_14bit)?;
        Ok(i + 3)
    }

    fn order_pt(&mut self, screen: &mut Screen) {
        if self.pt_erase {
            let (field_addr, _) = screen.field(screen.bufadd);
            if field_addr >= 0 {
                let field_addr = field_addr as usize;
                let stop = {
                    let (next, _) = screen.next_field(field_addr, 1);
                    if next >= 0 { next as usize } else { field_addr }
                };
                let mut a = screen.bufadd;
                while a != stop {
                    screen.dc[a] = 0;
                    a = screen.advance(a, 1);
                }
            }
        }
        self.pt_erase = false;
        screen.bufadd = screen.next_unprotected_data_start(screen.bufadd);
    }

    fn order_ra(&mut self, data: &[u8], i: usize, screen: &mut Screen) -> Result<usize> {
        let b0 = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated RA".into() })?;
        let b1 = *data.get(i + 2).ok_or_else(|| Error::ProtocolViolation { detail: "truncated RA".into() })?;
        let stop = decode_address(b0, b1, screen.buffer_size(), self.force_14bit)?;
        let mut j = i + 3;
        let mut ge = false;
        if data.get(j) == Some(&ORDER_GE) {
            ge = true;
            j += 1;
        }
        let fill = *data.get(j).ok_or_else(|| Error::ProtocolViolation { detail: "RA missing fill byte".into() })?;
        j += 1;
        let mut a = screen.bufadd;
        while a != stop {
            screen.dc[a] = fill;
            screen.fa[a] = 0;
            screen.eh[a] = self.proc_eh;
            screen.cs[a] = if ge { 1 } else { self.proc_cs };
            screen.fg[a] = self.proc_fg;
            screen.bg[a] = self.proc_bg;
            a = screen.advance(a, 1);
        }
        screen.bufadd = stop;
        self.pt_erase = true;
        Ok(j)
    }

    fn order_eua(&mut self, data: &[u8], i: usize, screen: &mut Screen) -> Result<usize> {
        let b0 = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated EUA".into() })?;
        let b1 = *data.get(i + 2).ok_or_else(|| Error::ProtocolViolation { detail: "truncated EUA".into() })?;
        let stop = decode_address(b0, b1, screen.buffer_size(), self.force_14bit)?;
        let mut a = screen.bufadd;
        while a != stop {
            if !screen.is_attr_cell(a) && !screen.is_protected(a) {
                screen.dc[a] = 0;
            }
            a = screen.advance(a, 1);
        }
        screen.bufadd = stop;
        Ok(i + 3)
    }

    fn order_sa(&mut self, data: &[u8], i: usize, screen: &mut Screen) -> Result<usize> {
        let t = *data.get(i + 1).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SA".into() })?;
        let v = *data.get(i + 2).ok_or_else(|| Error::ProtocolViolation { detail: "truncated SA".into() })?;
        match t {
            0x00 => {
                self.proc_eh = 0;
                self.proc_fg = 0;
                self.proc_cs = 0;
                self.proc_bg = 0;
            }
            XA_HIGHLIGHT => self.proc_eh = v,
            XA_FOREGROUND => {
                self.proc_fg = v;
                screen.extended_color_mode = true;
            }
            XA_CHARSET => self.proc_cs = v,
            XA_BACKGROUND => {
                self.proc_bg = v;
                screen.extended_color_mode = true;
            }
            other => {
                return Err(Error::ProtocolViolation {
                    detail: format!("SA unknown attribute type 0x{other:02X}"),
                })
            }
        }
        Ok(i + 3)
    }

    fn note_extended_color(&self, screen: &mut Screen, observer: &mut dyn ScreenObserver) {
        if !screen.extended_color_mode {
            screen.extended_color_mode = true;
            observer.on_extended_color_entered();
        }
    }

    fn erase_all_unprotected(&mut self, screen: &mut Screen, observer: &mut dyn ScreenObserver) {
        let n = screen.buffer_size();
        for a in 0..n {
            if !screen.is_attr_cell(a) && !screen.is_protected(a) {
                screen.dc[a] = 0;
            }
        }
        screen.reset_all_mdt();
        screen.curadd = screen.first_unprotected_position();
        observer.on_cursor_changed(screen.curadd);
        self.interaction.pwait = false;
        self.interaction.system_lock_wait = false;
        self.interaction.aid = Aid::None;
        self.read_state = ReadState::Normal;
        observer.on_keylock_changed(false);
    }

    /// Split a `WSF` body into length-prefixed structured fields:
    /// `<len_hi> <len_lo> <id> <data...>` repeated, `len` counting itself.
    fn split_structured_fields(&self, data: &[u8]) -> Result<Vec<StructuredField>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            if i + 2 > data.len() {
                return Err(Error::ProtocolViolation { detail: "truncated structured field length".into() });
            }
            let len = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
            if len < 3 || i + len > data.len() {
                return Err(Error::ProtocolViolation { detail: format!("bad structured field length {len}") });
            }
            let id = data[i + 2];
            let body = data[i + 3..i + len].to_vec();
            out.push(StructuredField { id, data: body });
            i += len;
        }
        Ok(out)
    }

    /// Handle the structured fields this component owns (Set-Reply-Mode,
    /// Outbound-3270DS) inline, and pass the rest through to the caller.
    fn dispatch_inline_structured_fields(
        &mut self,
        fields: Vec<StructuredField>,
        screen: &mut Screen,
        observer: &mut dyn ScreenObserver,
    ) -> Result<Action> {
        let mut passthrough = Vec::new();
        for field in fields {
            match field.id {
                SFID_SET_REPLY_MODE => self.apply_set_reply_mode(&field.data)?,
                SFID_OUTBOUND_3270DS => self.apply_outbound_3270ds(&field.data, screen, observer)?,
                _ => passthrough.push(field),
            }
        }
        if passthrough.is_empty() {
            Ok(Action::None)
        } else {
            Ok(Action::StructuredFields(passthrough))
        }
    }

    /// `<pid> <mode> [<attr-type>...]`; mode 2 (Character) supplies the
    /// attribute-type list to track in `reply_cattrs`.
    fn apply_set_reply_mode(&mut self, data: &[u8]) -> Result<()> {
        let mode = *data.get(1).ok_or_else(|| Error::ProtocolViolation {
            detail: "Set-Reply-Mode missing mode byte".into(),
        })?;
        match mode {
            0 | 1 => self.reply_cattrs.clear(),
            2 => self.reply_cattrs = data.get(2..).map(|s| s.to_vec()).unwrap_or_default(),
            other => {
                return Err(Error::ProtocolViolation { detail: format!("bad reply mode {other}") });
            }
        }
        self.reply_mode = mode;
        Ok(())
    }

    /// `<pid> <command> <command-data...>`: re-enter command dispatch with
    /// the embedded command byte and its own data.
    fn apply_outbound_3270ds(&mut self, data: &[u8], screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<()> {
        let cmd = *data.get(1).ok_or_else(|| Error::ProtocolViolation {
            detail: "Outbound-3270DS missing command byte".into(),
        })?;
        let rest = data.get(2..).unwrap_or(&[]);
        match cmd {
            CMD_W | CMD_W_SHORT => self.do_write(rest, screen, observer),
            CMD_EW | CMD_EW_SHORT => {
                screen.erase(false);
                observer.on_erase();
                self.reset_write_state();
                self.do_write(rest, screen, observer)
            }
            CMD_EWA | CMD_EWA_SHORT => {
                screen.erase(true);
                observer.on_erase();
                self.reset_write_state();
                self.do_write(rest, screen, observer)
            }
            other => Err(Error::ProtocolViolation {
                detail: format!("unsupported Outbound-3270DS command 0x{other:02X}"),
            }),
        }
    }
}

impl Default for OutboundProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::ScreenSize;
    use crate::traits::NullObserver;

    fn screen() -> Screen {
        Screen::new(ScreenSize::new(24, 80), ScreenSize::new(24, 80))
    }

    #[test]
    fn scenario_4_order_decoding() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_EW, 0xC3, ORDER_SBA, 0xC1, 0xF0, ORDER_SF, 0x40, 0xC1, 0xC2, 0xC3];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(s.fa[112], 0x40);
        assert_eq!(&s.dc[113..116], &[0xC1, 0xC2, 0xC3]);
        assert_eq!(s.curadd, 0); // no IC in this record
    }

    #[test]
    fn sf_bit6_encodes_a_non_canonical_attribute_byte() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        // 0x00 carries the same low 6 bits as the canonical 0x40 (both
        // unprotected/normal/no-MDT) but isn't itself a valid wire byte.
        let record = [CMD_EW, 0x00, ORDER_SF, 0x00];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(s.fa[0], 0x40);
        assert!(!s.is_unformatted());
    }

    #[test]
    fn sfe_unknown_attribute_type_is_protocol_violation() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_EW, 0x00, ORDER_SFE, 0x01, 0x99, 0x00];
        let err = p.process_record(&record, &mut s, &mut obs).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn sa_unknown_attribute_type_is_protocol_violation() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_EW, 0x00, ORDER_SA, 0x99, 0x00];
        let err = p.process_record(&record, &mut s, &mut obs).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn wcc_reset_mdt_clears_all_fields() {
        let mut s = screen();
        s.fa[0] = 0x41; // unprotected, MDT set
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_W, WCC_RESET_MDT];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(s.fa[0] & crate::codes::ATTR_MDT, 0);
    }

    #[test]
    fn wcc_restore_keyboard_clears_locks() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        p.interaction.pwait = true;
        p.interaction.system_lock_wait = true;
        let mut obs = NullObserver;
        let record = [CMD_W, WCC_RESTORE_KEYBOARD];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert!(!p.interaction.pwait);
        assert!(!p.interaction.system_lock_wait);
    }

    #[test]
    fn ra_fills_to_stop_address() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let stop = crate::addressing::encode_address(5, s.buffer_size());
        let record = [CMD_W, 0x00, ORDER_RA, stop[0], stop[1], 0xC1];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(&s.dc[0..5], &[0xC1, 0xC1, 0xC1, 0xC1, 0xC1]);
    }

    #[test]
    fn ge_order_marks_alternate_charset() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_W, 0x00, ORDER_GE, 0xAB];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(s.dc[0], 0xAB);
        assert_eq!(s.cs[0], 1);
    }

    #[test]
    fn sfe_foreground_enters_extended_color_mode() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let record = [CMD_W, 0x00, ORDER_SFE, 0x01, XA_FOREGROUND, 0xF2];
        p.process_record(&record, &mut s, &mut obs).unwrap();
        assert!(s.extended_color_mode);
        assert_eq!(s.fg[0], 0xF2);
    }

    #[test]
    fn rm_in_normal_state_does_nothing() {
        let mut p = OutboundProcessor::new();
        assert_eq!(p.handle_read_modified(), Action::None);
    }

    #[test]
    fn rm_after_aid_sent_builds_inbound_then_resends() {
        let mut p = OutboundProcessor::new();
        p.on_aid_sent(Aid::Enter);
        assert_eq!(p.handle_read_modified(), Action::BuildAndSendInbound);
        p.record_sent_inbound(vec![0x7D]);
        assert_eq!(p.handle_read_modified(), Action::Resend(vec![0x7D]));
    }

    #[test]
    fn wsf_set_reply_mode_updates_state() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let payload = [0x00u8, 0x02, 0x41, 0x42];
        let mut sf = vec![0x00, (3 + payload.len()) as u8, SFID_SET_REPLY_MODE];
        sf.extend(payload);
        let mut record = vec![CMD_WSF];
        record.extend(sf);
        let action = p.process_record(&record, &mut s, &mut obs).unwrap();
        assert_eq!(action, Action::None);
        assert_eq!(p.reply_mode, 2);
        assert_eq!(p.reply_cattrs, vec![0x41, 0x42]);
    }

    #[test]
    fn wsf_unknown_sfid_passes_through() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let mut record = vec![CMD_WSF, 0x00, 0x05, 0x01, 0xAA, 0xBB];
        let action = p.process_record(&mut record, &mut s, &mut obs).unwrap();
        match action {
            Action::StructuredFields(fields) => {
                assert_eq!(fields, vec![StructuredField { id: 0x01, data: vec![0xAA, 0xBB] }]);
            }
            other => panic!("expected passthrough, got {other:?}"),
        }
    }

    #[test]
    fn unknown_command_byte_is_protocol_violation() {
        let mut s = screen();
        let mut p = OutboundProcessor::new();
        let mut obs = NullObserver;
        let err = p.process_record(&[0x99], &mut s, &mut obs).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }
}
</content>
