//! Query-Reply Engine (C9): structured-field replies to `WSF -> Read
//! Partition` (Query / Query List).
//!
//! The exact field widths and byte values below are grounded on a real
//! terminal's query-reply builder (Summary, Usable Area, Implicit
//! Partitions, Character Sets, Highlight, Reply Modes, DDM, Color).

use crate::codes::Aid;

/// QCODEs this engine can answer, in the order they appear in the Summary
/// reply.
const QCODE_SUMMARY: u8 = 0x80;
const QCODE_USABLE_AREA: u8 = 0x81;
const QCODE_CHARACTER_SETS: u8 = 0x85;
const QCODE_COLOR: u8 = 0x86;
const QCODE_HIGHLIGHT: u8 = 0x87;
const QCODE_REPLY_MODES: u8 = 0x88;
const QCODE_DDM: u8 = 0x95;
const QCODE_IMPLICIT_PARTITIONS: u8 = 0xA6;

/// Structured-field ID every Query Reply is wrapped in.
const SFID_QUERY_REPLY: u8 = 0x81;

/// Terminal capabilities the query-reply builder reports; sourced from the
/// active [`Screen`](crate::screen::Screen) size and
/// [`CodecRegistry`](crate::codec::CodecRegistry) at connect time.
#[derive(Debug, Clone)]
pub struct QueryReplyConfig {
    pub default_cols: u16,
    pub default_rows: u16,
    pub alt_cols: u16,
    pub alt_rows: u16,
    /// `(character-set number, code-page number)` for the primary codec.
    pub primary_cgcsgid: (u16, u16),
    /// Present iff an alternate (GE) codec is registered.
    pub alternate_cgcsgid: Option<(u16, u16)>,
    pub color_capable: bool,
    /// DDM inbound/outbound record-size limits, defaults 32639/32767.
    pub ddm_limin: u16,
    pub ddm_limout: u16,
}

impl Default for QueryReplyConfig {
    fn default() -> Self {
        Self {
            default_cols: 80,
            default_rows: 24,
            alt_cols: 80,
            alt_rows: 24,
            primary_cgcsgid: (697, 37), // CGCSGID 697 / CP037
            alternate_cgcsgid: None,
            color_capable: false,
            ddm_limin: 32639,
            ddm_limout: 32767,
        }
    }
}

fn wrap(qcode: u8, mut data: Vec<u8>) -> Vec<u8> {
    let mut body = vec![qcode];
    body.append(&mut data);
    let mut sf = vec![SFID_QUERY_REPLY];
    sf.append(&mut body);
    let len = (sf.len() + 2) as u16;
    let mut out = len.to_be_bytes().to_vec();
    out.append(&mut sf);
    out
}

fn supported_qcodes(cfg: &QueryReplyConfig) -> Vec<u8> {
    let mut codes = vec![QCODE_SUMMARY, QCODE_USABLE_AREA, QCODE_CHARACTER_SETS];
    if cfg.color_capable {
        codes.push(QCODE_COLOR);
    }
    codes.push(QCODE_HIGHLIGHT);
    codes.push(QCODE_REPLY_MODES);
    codes.push(QCODE_DDM);
    codes.push(QCODE_IMPLICIT_PARTITIONS);
    codes
}

fn summary_sf(cfg: &QueryReplyConfig) -> Vec<u8> {
    wrap(QCODE_SUMMARY, supported_qcodes(cfg))
}

fn usable_area_sf(cfg: &QueryReplyConfig) -> Vec<u8> {
    let mut data = Vec::new();
    data.push(0x01); // Flags(4): 12/14-bit addressing allowed
    data.push(0x00); // Flags(5): no variable cells, matrix character
    data.extend(cfg.default_cols.to_be_bytes());
    data.extend(cfg.default_rows.to_be_bytes());
    data.push(0x00); // UNITS: inches
    data.extend(1u16.to_be_bytes()); // Xr numerator
    data.extend(96u16.to_be_bytes()); // Xr denominator
    data.extend(1u16.to_be_bytes()); // Yr numerator
    data.extend(96u16.to_be_bytes()); // Yr denominator
    data.push(0x06); // AW
    data.push(0x0C); // AH
    wrap(QCODE_USABLE_AREA, data)
}

fn implicit_partitions_sf(cfg: &QueryReplyConfig) -> Vec<u8> {
    let mut data = vec![0x00, 0x00]; // reserved flags
    data.push(0x0B); // length of the self-defining parameter below
    data.push(0x01); // Implicit Partition Sizes
    data.push(0x00); // reserved flags
    data.extend(cfg.alt_cols.to_be_bytes()); // WD
    data.extend(cfg.alt_rows.to_be_bytes()); // HD
    data.extend(cfg.default_cols.to_be_bytes()); // WA
    data.extend(cfg.default_rows.to_be_bytes()); // HA
    wrap(QCODE_IMPLICIT_PARTITIONS, data)
}

fn character_sets_sf(cfg: &QueryReplyConfig) -> Vec<u8> {
    let mut data = Vec::new();
    data.push(if cfg.alternate_cgcsgid.is_some() { 0x82 } else { 0x02 }); // Flags(1): ALT + GF present
    data.push(0x00); // Flags(2)
    data.push(0x06); // SDW
    data.push(0x0C); // SDH
    data.extend([0u8; 4]); // FORM
    data.push(if cfg.alternate_cgcsgid.is_some() { 0x07 } else { 0x07 }); // DL: descriptor length

    data.push(0x00); // SET 0
    data.push(0x00); // Flags(3)
    data.push(0x00); // LCID
    data.extend(cfg.primary_cgcsgid.0.to_be_bytes());
    data.extend(cfg.primary_cgcsgid.1.to_be_bytes());

    if let Some((cs, cp)) = cfg.alternate_cgcsgid {
        data.push(0x01); // SET 1
        data.push(0x00); // Flags(3)
        data.push(0xF1); // LCID: GE alias
        data.extend(cs.to_be_bytes());
        data.extend(cp.to_be_bytes());
    }
    wrap(QCODE_CHARACTER_SETS, data)
}

fn highlight_sf() -> Vec<u8> {
    let data = vec![
        0x05, // 5 value/action pairs follow
        0x00, 0xF0, // normal
        0xF1, 0xF1, // blink
        0xF2, 0xF2, // reverse
        0xF4, 0xF4, // underscore
        0xF8, 0xF8, // intensify
    ];
    wrap(QCODE_HIGHLIGHT, data)
}

fn reply_modes_sf() -> Vec<u8> {
    wrap(QCODE_REPLY_MODES, vec![0x00, 0x01, 0x02])
}

fn ddm_sf(cfg: &QueryReplyConfig) -> Vec<u8> {
    let mut data = vec![0x00, 0x00]; // reserved flags
    data.extend(cfg.ddm_limin.to_be_bytes());
    data.extend(cfg.ddm_limout.to_be_bytes());
    data.push(0x01); // NSS: one subset supported
    data.push(0x01); // DDMSS: subset identifier
    wrap(QCODE_DDM, data)
}

fn color_sf() -> Vec<u8> {
    let data = vec![
        0x00, // flags
        0x08, // 8 CAV/COLOR pairs
        0x00, 0xF4, // default -> green
        0xF1, 0xF1, // blue
        0xF2, 0xF2, // red
        0xF3, 0xF3, // pink
        0xF4, 0xF4, // green
        0xF5, 0xF5, // turquoise
        0xF6, 0xF6, // yellow
        0xF7, 0xF7, // white
    ];
    wrap(QCODE_COLOR, data)
}

/// Build the full inbound record for `WSF -> Read Partition -> Query`: the
/// Structured-Field AID byte followed by one reply SF per supported QCODE.
pub fn build_query_reply(cfg: &QueryReplyConfig) -> Vec<u8> {
    build_filtered(cfg, None)
}

/// Build the reply for `WSF -> Read Partition -> Query List`, restricted to
/// the requested QCODEs (Summary is always included).
pub fn build_query_list_reply(cfg: &QueryReplyConfig, requested: &[u8]) -> Vec<u8> {
    build_filtered(cfg, Some(requested))
}

fn build_filtered(cfg: &QueryReplyConfig, requested: Option<&[u8]>) -> Vec<u8> {
    let mut out = vec![Aid::StructuredField.to_byte()];
    let wants = |code: u8| requested.map(|r| r.contains(&code)).unwrap_or(true);

    // Summary is always included, even when a Query List restricts everything else.
    out.extend(summary_sf(cfg));
    if wants(QCODE_USABLE_AREA) {
        out.extend(usable_area_sf(cfg));
    }
    if wants(QCODE_IMPLICIT_PARTITIONS) {
        out.extend(implicit_partitions_sf(cfg));
    }
    if wants(QCODE_CHARACTER_SETS) {
        out.extend(character_sets_sf(cfg));
    }
    if wants(QCODE_HIGHLIGHT) {
        out.extend(highlight_sf());
    }
    if wants(QCODE_REPLY_MODES) {
        out.extend(reply_modes_sf());
    }
    if wants(QCODE_DDM) {
        out.extend(ddm_sf(cfg));
    }
    if cfg.color_capable && wants(QCODE_COLOR) {
        out.extend(color_sf());
    }
    out
}
