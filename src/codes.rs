//! Wire-format byte constants for 3270 commands, orders, AID keys, and the
//! Write Control Character bits.

// Commands (long EBCDIC form / short form map to the same op).
pub const CMD_W: u8 = 0xF1;
pub const CMD_W_SHORT: u8 = 0x01;
pub const CMD_EW: u8 = 0xF5;
pub const CMD_EW_SHORT: u8 = 0x05;
pub const CMD_EWA: u8 = 0x7E;
pub const CMD_EWA_SHORT: u8 = 0x0D;
pub const CMD_EAU: u8 = 0x6F;
pub const CMD_EAU_SHORT: u8 = 0x0F;
pub const CMD_RM: u8 = 0xF6;
pub const CMD_RM_SHORT: u8 = 0x06;
pub const CMD_RB: u8 = 0xF2;
pub const CMD_RB_SHORT: u8 = 0x02;
pub const CMD_RMA: u8 = 0x6E;
pub const CMD_WSF: u8 = 0xF3;
pub const CMD_WSF_SHORT: u8 = 0x11;

/// Orders, detected inline in the data stream.
pub const ORDER_PT: u8 = 0x05;
pub const ORDER_GE: u8 = 0x08;
pub const ORDER_SBA: u8 = 0x11;
pub const ORDER_EUA: u8 = 0x12;
pub const ORDER_IC: u8 = 0x13;
pub const ORDER_SF: u8 = 0x1D;
pub const ORDER_SA: u8 = 0x28;
pub const ORDER_SFE: u8 = 0x29;
pub const ORDER_MF: u8 = 0x2C;
pub const ORDER_RA: u8 = 0x3C;

/// WCC bits, numbered MSB-first per the IBM data-stream reference (bit 0 is
/// `0x80`, bit 7 is `0x01`); confirmed against the reference implementation's
/// `_process_wcc`.
pub const WCC_RESET_MDT: u8 = 0x01; // bit 7
pub const WCC_START_PRINTER: u8 = 0x08; // bit 4 (not implemented; logged)
pub const WCC_ALARM: u8 = 0x04; // bit 5
pub const WCC_RESTORE_KEYBOARD: u8 = 0x02; // bit 6
pub const WCC_RESET_PARTITION: u8 = 0x40; // bit 1

/// Field attribute byte bits (post-bit6 encoding).
pub const ATTR_PROTECTED: u8 = 0x20;
pub const ATTR_NUMERIC: u8 = 0x10;
pub const ATTR_DISPLAY_MASK: u8 = 0x0C;
pub const ATTR_MDT: u8 = 0x01;

/// Extended-attribute type codes used by SFE/MF/SA.
pub const XA_ALL: u8 = 0x00;
pub const XA_FIELD_ATTRIBUTE: u8 = 0xC0;
pub const XA_HIGHLIGHT: u8 = 0x41;
pub const XA_FOREGROUND: u8 = 0x42;
pub const XA_CHARSET: u8 = 0x43;
pub const XA_BACKGROUND: u8 = 0x45;

/// Extended highlight values.
pub const HIGHLIGHT_NORMAL: u8 = 0x00;
pub const HIGHLIGHT_BLINK: u8 = 0xF1;
pub const HIGHLIGHT_REVERSE: u8 = 0xF2;
pub const HIGHLIGHT_UNDERSCORE: u8 = 0xF4;
pub const HIGHLIGHT_INTENSIFY: u8 = 0xF8;

/// AID (Attention Identifier) keys, first byte of an inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aid {
    None,
    Enter,
    Clear,
    Pa1,
    Pa2,
    Pa3,
    Pf(u8), // 1..=24
    ReadPartition,
    StructuredField,
}

impl Aid {
    pub fn to_byte(self) -> u8 {
        match self {
            Aid::None => 0x60,
            Aid::Enter => 0x7D,
            Aid::Clear => 0x6D,
            Aid::Pa1 => 0x6C,
            Aid::Pa2 => 0x6E,
            Aid::Pa3 => 0x6B,
            Aid::Pf(n) => PF_AID[(n - 1) as usize],
            Aid::ReadPartition => 0x61,
            Aid::StructuredField => 0x88,
        }
    }

    /// `true` for AIDs whose inbound record is the bare AID byte with no
    /// cursor address or field data (CLEAR and PA1-3).
    pub fn is_short(self) -> bool {
        matches!(self, Aid::Clear | Aid::Pa1 | Aid::Pa2 | Aid::Pa3)
    }
}

/// PF1..PF24 AID byte table, in order.
const PF_AID: [u8; 24] = [
    0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0x7A, 0x7B, 0x7C,
    0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0x4A, 0x4B, 0x4C,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_aid_byte() {
        assert_eq!(Aid::Enter.to_byte(), 0x7D);
    }

    #[test]
    fn pf_aids_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for n in 1..=24u8 {
            assert!(seen.insert(Aid::Pf(n).to_byte()), "duplicate AID byte for PF{n}");
        }
    }

    #[test]
    fn short_aids() {
        assert!(Aid::Clear.is_short());
        assert!(Aid::Pa1.is_short());
        assert!(!Aid::Enter.is_short());
        assert!(!Aid::Pf(1).is_short());
    }
}
</content>
