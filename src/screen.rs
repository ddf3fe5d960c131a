//! Screen Model (C2): the six parallel planes backing the formatted 3270
//! display buffer, plus field/group iteration and cursor tracking.

use crate::addressing::Circular;
use crate::codec::CodecRegistry;
use crate::codes::{ATTR_DISPLAY_MASK, ATTR_MDT, ATTR_PROTECTED};

/// A screen size: rows x cols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub rows: usize,
    pub cols: usize,
}

impl ScreenSize {
    pub const DEFAULT: ScreenSize = ScreenSize { rows: 24, cols: 80 };

    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn buffer_size(&self) -> usize {
        self.rows * self.cols
    }
}

/// The formatted display buffer: six parallel byte planes plus cursor and
/// bookkeeping state shared by the outbound processor, inbound builder, and
/// keyboard engine.
pub struct Screen {
    size: ScreenSize,
    alt_size: ScreenSize,
    using_alt: bool,

    /// EBCDIC data code; `0x00` is null.
    pub dc: Vec<u8>,
    /// Field-attribute byte at field-start cells, zero elsewhere.
    pub fa: Vec<u8>,
    /// Extended highlight.
    pub eh: Vec<u8>,
    /// Character set index (0 default, 1 alternate/GE).
    pub cs: Vec<u8>,
    /// Extended foreground color.
    pub fg: Vec<u8>,
    /// Extended background color.
    pub bg: Vec<u8>,

    /// Cursor address, `0 <= curadd < buffer_size`.
    pub curadd: usize,
    /// Write pointer used during order processing.
    pub bufadd: usize,

    /// `true` once a foreground/background attribute (types `42`/`45`) has
    /// been observed; see glossary "Extended color mode".
    pub extended_color_mode: bool,

    circ: Circular,
}

impl Screen {
    pub fn new(default_size: ScreenSize, alt_size: ScreenSize) -> Self {
        let buffer_size = default_size.buffer_size();
        Self {
            size: default_size,
            alt_size,
            using_alt: false,
            dc: vec![0; buffer_size],
            fa: vec![0; buffer_size],
            eh: vec![0; buffer_size],
            cs: vec![0; buffer_size],
            fg: vec![0; buffer_size],
            bg: vec![0; buffer_size],
            curadd: 0,
            bufadd: 0,
            extended_color_mode: false,
            circ: Circular::new(buffer_size),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.dc.len()
    }

    pub fn size(&self) -> ScreenSize {
        if self.using_alt { self.alt_size } else { self.size }
    }

    pub fn circular(&self) -> &Circular {
        &self.circ
    }

    /// Erase to a given size (EW -> default, EWA -> alternate), per
    /// invariant 7: all planes zero, cursor 0.
    pub fn erase(&mut self, to_alt: bool) {
        let size = if to_alt { self.alt_size } else { self.size };
        self.using_alt = to_alt;
        let n = size.buffer_size();
        self.dc = vec![0; n];
        self.fa = vec![0; n];
        self.eh = vec![0; n];
        self.cs = vec![0; n];
        self.fg = vec![0; n];
        self.bg = vec![0; n];
        self.curadd = 0;
        self.bufadd = 0;
        self.extended_color_mode = false;
        self.circ = Circular::new(n);
    }

    /// Move an address forward `delta` cells, modularly.
    pub fn advance(&self, addr: usize, delta: usize) -> usize {
        self.circ.advance(addr, delta)
    }

    pub fn wrap(&self, addr: usize) -> usize {
        self.circ.wrap(addr)
    }

    /// Is the screen unformatted (no field-attribute bytes anywhere)?
    pub fn is_unformatted(&self) -> bool {
        self.fa.iter().all(|&b| b == 0)
    }

    /// The field containing `addr`: `(field_start_addr, attr_byte)`, or
    /// `(-1, 0)` if the screen is unformatted.
    pub fn field(&self, addr: usize) -> (isize, u8) {
        if self.is_unformatted() {
            return (-1, 0);
        }
        let n = self.buffer_size();
        let mut a = addr;
        for _ in 0..n {
            if self.fa[a] != 0 {
                return (a as isize, self.fa[a]);
            }
            a = if a == 0 { n - 1 } else { a - 1 };
        }
        (-1, 0)
    }

    /// The next field-start strictly after `addr` (wrapping), `offset`
    /// fields ahead. Returns `(-1, 0)` if unformatted.
    pub fn next_field(&self, addr: usize, offset: usize) -> (isize, u8) {
        if self.is_unformatted() {
            return (-1, 0);
        }
        let n = self.buffer_size();
        let mut remaining = offset.max(1);
        let mut a = self.advance(addr, 1);
        for _ in 0..n {
            if self.fa[a] != 0 {
                remaining -= 1;
                if remaining == 0 {
                    return (a as isize, self.fa[a]);
                }
            }
            a = self.advance(a, 1);
        }
        (-1, 0)
    }

    /// All `(field_start_addr, attr_byte)` pairs in the buffer, in address
    /// order starting from `s`, restricted to `[s, e)` circularly. With
    /// `s == e` the whole buffer is scanned.
    pub fn fields(&self) -> Vec<(usize, u8)> {
        let n = self.buffer_size();
        (0..n).filter(|&a| self.fa[a] != 0).map(|a| (a, self.fa[a])).collect()
    }

    /// Ranges of non-attribute (character) cells within `[s, e)`
    /// (circular; `s == e` means the whole buffer).
    pub fn char_addrs(&self, s: usize, e: usize) -> Vec<(usize, usize)> {
        let n = self.buffer_size();
        if self.is_unformatted() {
            return if s == e { vec![(0, n)] } else { vec![(s, e)] };
        }
        let mut out = Vec::new();
        let mut run_start: Option<usize> = None;
        let mut a = s;
        loop {
            if self.fa[a] != 0 {
                if let Some(start) = run_start.take() {
                    out.push((start, a));
                }
            } else if run_start.is_none() {
                run_start = Some(a);
            }
            let next = self.advance(a, 1);
            if next == e || (s == e && next == s) {
                if let Some(start) = run_start.take() {
                    out.push((start, next));
                }
                break;
            }
            a = next;
        }
        out
    }

    /// Maximal runs of cells sharing identical `(eh, fg, bg)`, within
    /// `[s, e)` circular.
    pub fn group_addrs(&self, s: usize, e: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut run_start = s;
        let mut run_attr = (self.eh[s], self.fg[s], self.bg[s]);
        let mut a = s;
        loop {
            let next = self.advance(a, 1);
            let done = next == e;
            if !done {
                let attr = (self.eh[next], self.fg[next], self.bg[next]);
                if attr != run_attr {
                    out.push((run_start, next));
                    run_start = next;
                    run_attr = attr;
                }
            } else {
                out.push((run_start, next));
                break;
            }
            a = next;
        }
        out
    }

    /// Decode `[s, e)` to a Unicode string via the registered codecs,
    /// mapping control EBCDIC bytes to blank and SUB/DUP/FM to distinct
    /// placeholders. Trailing whitespace stripped if `rstrip`.
    pub fn scrstr(&self, s: usize, e: usize, rstrip: bool, codecs: &CodecRegistry) -> String {
        let bytes = if s == e {
            self.dc.clone()
        } else {
            self.circ.read(&self.dc, s, e)
        };
        let cs_bytes = if s == e {
            self.cs.clone()
        } else {
            self.circ.read(&self.cs, s, e)
        };
        let mut out = String::with_capacity(bytes.len());
        for (i, &b) in bytes.iter().enumerate() {
            let ch = match b {
                0x00 | 0x0C | 0x0D | 0x15 | 0x19 | 0x37 => ' ', // NUL/FF/CR/NL/EM/EO
                0x3F => '\u{2423}', // SUB placeholder (visible "blank" glyph)
                0x1C => '\u{2756}', // DUP placeholder
                0x1E => '\u{25A1}', // FM placeholder
                other => codecs.decode(other, cs_bytes[i]),
            };
            out.push(ch);
        }
        if rstrip {
            while out.ends_with(' ') {
                out.pop();
            }
        }
        out
    }

    /// Is `addr` a field-attribute cell?
    pub fn is_attr_cell(&self, addr: usize) -> bool {
        self.fa[addr] != 0
    }

    /// Is the field containing `addr` protected?
    pub fn is_protected(&self, addr: usize) -> bool {
        let (_, attr) = self.field(addr);
        attr & ATTR_PROTECTED != 0
    }

    /// Display-control bits (`0x0C`) of the field containing `addr`.
    pub fn display_control(&self, addr: usize) -> u8 {
        let (_, attr) = self.field(addr);
        attr & ATTR_DISPLAY_MASK
    }

    /// Set the MDT bit of the field-start cell at `field_addr`.
    pub fn set_mdt(&mut self, field_addr: usize) {
        self.fa[field_addr] |= ATTR_MDT;
    }

    /// Clear the MDT bit of every field (WCC bit 7 processing).
    pub fn reset_all_mdt(&mut self) {
        for a in 0..self.buffer_size() {
            if self.fa[a] != 0 {
                self.fa[a] &= !ATTR_MDT;
            }
        }
    }

    pub fn mdt(&self, field_addr: usize) -> bool {
        self.fa[field_addr] & ATTR_MDT != 0
    }

    /// First unprotected data position: address 0 on an unformatted screen,
    /// else the first data cell of the first unprotected field reached by
    /// scanning forward from the last cell (so a field starting at 0 is
    /// still found).
    pub fn first_unprotected_position(&self) -> usize {
        if self.is_unformatted() {
            return 0;
        }
        let n = self.buffer_size();
        self.next_unprotected_data_start(n - 1)
    }

    /// The first data cell of the next unprotected field after `from`,
    /// wrapping. Falls back to `from` if every field is protected or the
    /// screen is unformatted.
    pub fn next_unprotected_data_start(&self, from: usize) -> usize {
        if self.is_unformatted() {
            return from;
        }
        let n = self.buffer_size();
        let mut addr = from;
        for _ in 0..n {
            let (fa, attr) = self.next_field(addr, 1);
            if fa < 0 {
                return from;
            }
            let fa = fa as usize;
            if attr & ATTR_PROTECTED == 0 {
                return self.advance(fa, 1);
            }
            addr = fa;
        }
        from
    }

    /// The field-start-plus-1 of the previous unprotected field before
    /// `from`, wrapping backwards. Falls back to `from` if none exists.
    pub fn prev_unprotected_data_start(&self, from: usize) -> usize {
        if self.is_unformatted() {
            return from;
        }
        let n = self.buffer_size();
        let (start_fa, _) = self.field(from);
        if start_fa < 0 {
            return from;
        }
        let mut addr = start_fa as usize;
        for _ in 0..n {
            addr = if addr == 0 { n - 1 } else { addr - 1 };
            let (fa, attr) = self.field(addr);
            if fa < 0 {
                return from;
            }
            let fa = fa as usize;
            if attr & ATTR_PROTECTED == 0 {
                return self.advance(fa, 1);
            }
            addr = fa;
        }
        from
    }
}

</content>
