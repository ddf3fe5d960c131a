//! Keyboard Engine (C8): cursor moves, tab/backtab, erase, delete, insert,
//! and type-in under field-protection/MDT rules.
//!
//! Every operation here first checks the input-inhibited gate shared with
//! the outbound processor's [`InteractionState`](crate::outbound::InteractionState),
//! matching the "all operations require `!pwait && !system_lock_wait`"
//! contract.

use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::outbound::OutboundProcessor;
use crate::screen::Screen;
use crate::traits::ScreenObserver;

fn require_unlocked(outbound: &OutboundProcessor) -> Result<()> {
    if outbound.interaction.pwait || outbound.interaction.system_lock_wait {
        Err(Error::InputInhibited)
    } else {
        Ok(())
    }
}

fn mark_modified(screen: &mut Screen, addr: usize) {
    let (field_addr, _) = screen.field(addr);
    if field_addr >= 0 {
        let field_addr = field_addr as usize;
        if !screen.mdt(field_addr) {
            screen.set_mdt(field_addr);
        }
    }
}

/// Key a decoded string at the cursor, one character per cell, in either
/// overtype or insert mode.
pub fn key_data(
    text: &str,
    insert: bool,
    screen: &mut Screen,
    outbound: &OutboundProcessor,
    codecs: &CodecRegistry,
    observer: &mut dyn ScreenObserver,
) -> Result<()> {
    require_unlocked(outbound)?;
    let encoded = codecs
        .encode_str(text)
        .ok_or_else(|| Error::EncodingError { detail: format!("no registered codec can encode {text:?}") })?;

    for (byte, cs) in encoded {
        key_one(byte, cs, insert, screen, observer)?;
    }
    Ok(())
}

fn key_one(byte: u8, cs: u8, insert: bool, screen: &mut Screen, observer: &mut dyn ScreenObserver) -> Result<()> {
    let addr = screen.curadd;
    if screen.is_attr_cell(addr) || screen.is_protected(addr) {
        return Err(Error::InputInhibited);
    }
    let (field_addr, _) = screen.field(addr);
    let field_end = if field_addr >= 0 {
        let (next, _) = screen.next_field(field_addr as usize, 1);
        if next >= 0 { next as usize } else { field_addr as usize }
    } else {
        addr // unformatted: no field boundary to respect
    };

    if insert {
        if !has_trailing_room(screen, addr, field_end) {
            return Err(Error::InputInhibited);
        }
        shift_right(screen, addr, field_end);
    }

    screen.dc[addr] = byte;
    screen.cs[addr] = cs;
    mark_modified(screen, addr);
    observer.on_data(addr, 1);
    screen.curadd = screen.advance(addr, 1);
    observer.on_cursor_changed(screen.curadd);
    Ok(())
}

/// Is there a null/blank cell before `field_end` to absorb one inserted
/// character without truncating data?
fn has_trailing_room(screen: &Screen, from: usize, field_end: usize) -> bool {
    if from == field_end {
        return false;
    }
    let last = screen.advance(field_end, screen.buffer_size() - 1); // field_end - 1, modularly
    screen.dc[last] == 0
}

/// Shift `(from, field_end)` right by one cell: the cell at `field_end - 1`
/// is dropped, and `from` itself is left for the caller to overwrite.
fn shift_right(screen: &mut Screen, from: usize, field_end: usize) {
    let mut a = screen.advance(field_end, screen.buffer_size() - 1);
    while a != from {
        let prev = screen.advance(a, screen.buffer_size() - 1);
        screen.dc[a] = screen.dc[prev];
        screen.cs[a] = screen.cs[prev];
        a = prev;
    }
}

/// Paste multi-character text the same way as `key_data`, overtype mode.
pub fn paste(
    text: &str,
    screen: &mut Screen,
    outbound: &OutboundProcessor,
    codecs: &CodecRegistry,
    observer: &mut dyn ScreenObserver,
) -> Result<()> {
    key_data(text, false, screen, outbound, codecs, observer)
}

pub fn cursor_left(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    screen.curadd = screen.advance(screen.curadd, screen.buffer_size() - 1);
    Ok(())
}

pub fn cursor_right(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    screen.curadd = screen.advance(screen.curadd, 1);
    Ok(())
}

pub fn cursor_up(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    let cols = screen.size().cols;
    screen.curadd = screen.advance(screen.curadd, screen.buffer_size() - cols);
    Ok(())
}

pub fn cursor_down(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    let cols = screen.size().cols;
    screen.curadd = screen.advance(screen.curadd, cols);
    Ok(())
}

/// Move to the field-start-plus-1 of the next unprotected field, skipping
/// zero-length fields; wraps; lands on 0 if none exists.
pub fn tab(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    if screen.is_unformatted() {
        screen.curadd = 0;
        return Ok(());
    }
    let start_field = match screen.field(screen.curadd) {
        (fa, _) if fa >= 0 => fa as usize,
        _ => screen.curadd,
    };
    let n = screen.buffer_size();
    let mut addr = start_field;
    for _ in 0..n {
        let (fa, attr) = screen.next_field(addr, 1);
        if fa < 0 {
            screen.curadd = 0;
            return Ok(());
        }
        let fa = fa as usize;
        if attr & crate::codes::ATTR_PROTECTED == 0 && !is_zero_length_field(screen, fa) {
            screen.curadd = screen.advance(fa, 1);
            return Ok(());
        }
        addr = fa;
    }
    screen.curadd = 0;
    Ok(())
}

/// Move to the field-start-plus-1 of the previous unprotected field,
/// skipping zero-length fields; wraps.
pub fn backtab(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    if screen.is_unformatted() {
        screen.curadd = 0;
        return Ok(());
    }
    let n = screen.buffer_size();
    let (start_field, _) = screen.field(screen.curadd);
    let mut addr = if start_field >= 0 { start_field as usize } else { screen.curadd };
    for _ in 0..n {
        addr = if addr == 0 { n - 1 } else { addr - 1 };
        let (fa, attr) = screen.field(addr);
        if fa < 0 {
            screen.curadd = 0;
            return Ok(());
        }
        let fa = fa as usize;
        if attr & crate::codes::ATTR_PROTECTED == 0 && !is_zero_length_field(screen, fa) {
            screen.curadd = screen.advance(fa, 1);
            return Ok(());
        }
        addr = fa;
    }
    screen.curadd = 0;
    Ok(())
}

fn is_zero_length_field(screen: &Screen, field_addr: usize) -> bool {
    let (next, _) = screen.next_field(field_addr, 1);
    next >= 0 && next as usize == screen.advance(field_addr, 1)
}

/// Move to the first unprotected position, or 0 if unformatted.
pub fn home(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    screen.curadd = screen.first_unprotected_position();
    Ok(())
}

/// Find the last non-null cell of the current field, or the trailing blank
/// run's start if the field ends blank; protected fields land on the next
/// field's attribute cell.
pub fn end(screen: &mut Screen, outbound: &OutboundProcessor) -> Result<()> {
    require_unlocked(outbound)?;
    let (field_addr, attr) = screen.field(screen.curadd);
    if field_addr < 0 {
        return Ok(()); // unformatted: no field boundary, no-op
    }
    let field_addr = field_addr as usize;
    if attr & crate::codes::ATTR_PROTECTED != 0 {
        let (next, _) = screen.next_field(field_addr, 1);
        screen.curadd = if next >= 0 { next as usize } else { field_addr };
        return Ok(());
    }
    let data_start = screen.advance(field_addr, 1);
    let data_end = {
        let (next, _) = screen.next_field(field_addr, 1);
        if next >= 0 { next as usize } else { field_addr }
    };
    if data_start == data_end {
        screen.curadd = data_start;
        return Ok(());
    }
    let mut last_nonblank: Option<usize> = None;
    let mut a = data_start;
    while a != data_end {
        if screen.dc[a] != 0 {
            last_nonblank = Some(a);
        }
        a = screen.advance(a, 1);
    }
    screen.curadd = match last_nonblank {
        Some(a) => screen.advance(a, 1), // one past the last non-blank cell
        None => data_start,
    };
    Ok(())
}

/// Refuse on attribute/protected; shift field contents left by one, blank
/// the trailing cell, set MDT.
pub fn delete(screen: &mut Screen, outbound: &OutboundProcessor, observer: &mut dyn ScreenObserver) -> Result<()> {
    require_unlocked(outbound)?;
    let addr = screen.curadd;
    if screen.is_attr_cell(addr) || screen.is_protected(addr) {
        return Err(Error::InputInhibited);
    }
    let (field_addr, _) = screen.field(addr);
    let field_end = if field_addr >= 0 {
        let (next, _) = screen.next_field(field_addr as usize, 1);
        if next >= 0 { next as usize } else { field_addr as usize }
    } else {
        addr
    };
    let last = screen.advance(field_end, screen.buffer_size() - 1);
    let mut a = addr;
    while a != last {
        let next = screen.advance(a, 1);
        screen.dc[a] = screen.dc[next];
        screen.cs[a] = screen.cs[next];
        a = next;
    }
    screen.dc[last] = 0;
    screen.cs[last] = 0;
    mark_modified(screen, addr);
    observer.on_data(addr, screen.circular().span(addr, field_end));
    Ok(())
}

/// Cursor-left then delete, unless the previous cell is a field-attribute
/// byte.
pub fn backspace(screen: &mut Screen, outbound: &OutboundProcessor, observer: &mut dyn ScreenObserver) -> Result<()> {
    require_unlocked(outbound)?;
    let prev = screen.advance(screen.curadd, screen.buffer_size() - 1);
    if screen.is_attr_cell(prev) {
        screen.curadd = prev;
        return Ok(());
    }
    screen.curadd = prev;
    delete(screen, outbound, observer)
}

/// Zero all cells from `curadd` to the next field-start (full wrap if
/// unformatted); set MDT.
pub fn erase_eof(screen: &mut Screen, outbound: &OutboundProcessor, observer: &mut dyn ScreenObserver) -> Result<()> {
    require_unlocked(outbound)?;
    let start = screen.curadd;
    let stop = if screen.is_unformatted() {
        start
    } else {
        let (field_addr, _) = screen.field(start);
        if field_addr >= 0 {
            let (next, _) = screen.next_field(field_addr as usize, 1);
            if next >= 0 { next as usize } else { field_addr as usize }
        } else {
            start
        }
    };
    let mut a = start;
    loop {
        screen.dc[a] = 0;
        let next = screen.advance(a, 1);
        if next == stop {
            break;
        }
        a = next;
    }
    mark_modified(screen, start);
    observer.on_data(start, screen.circular().span(start, stop));
    Ok(())
}

/// For every unprotected field, zero its data cells; reset all MDT; home
/// cursor.
pub fn erase_input(screen: &mut Screen, outbound: &OutboundProcessor, observer: &mut dyn ScreenObserver) -> Result<()> {
    require_unlocked(outbound)?;
    if screen.is_unformatted() {
        for a in 0..screen.buffer_size() {
            screen.dc[a] = 0;
        }
    } else {
        for (field_addr, attr) in screen.fields() {
            if attr & crate::codes::ATTR_PROTECTED != 0 {
                continue;
            }
            let data_start = screen.advance(field_addr, 1);
            let (next, _) = screen.next_field(field_addr, 1);
            let data_end = if next >= 0 { next as usize } else { field_addr };
            let mut a = data_start;
            while a != data_end {
                screen.dc[a] = 0;
                a = screen.advance(a, 1);
            }
        }
    }
    screen.reset_all_mdt();
    screen.curadd = screen.first_unprotected_position();
    observer.on_erase();
    observer.on_cursor_changed(screen.curadd);
    Ok(())
}

/// Advance over a whitespace boundary using the decoded screen text
///.
pub fn word_right(screen: &mut Screen, outbound: &OutboundProcessor, codecs: &CodecRegistry) -> Result<()> {
    require_unlocked(outbound)?;
    let text: Vec<char> = screen.scrstr(0, 0, false, codecs).chars().collect();
    let n = text.len();
    if n == 0 {
        return Ok(());
    }
    let mut i = screen.curadd % n;
    while i < n && !text[i].is_whitespace() {
        i += 1;
    }
    while i < n && text[i].is_whitespace() {
        i += 1;
    }
    screen.curadd = if i >= n { 0 } else { i };
    Ok(())
}

pub fn word_left(screen: &mut Screen, outbound: &OutboundProcessor, codecs: &CodecRegistry) -> Result<()> {
    require_unlocked(outbound)?;
    let text: Vec<char> = screen.scrstr(0, 0, false, codecs).chars().collect();
    let n = text.len();
    if n == 0 {
        return Ok(());
    }
    let mut i = screen.curadd % n;
    loop {
        i = if i == 0 { n - 1 } else { i - 1 };
        if text[i].is_whitespace() || i == screen.curadd % n {
            break;
        }
    }
    while i > 0 && !text[i - 1].is_whitespace() {
        i -= 1;
    }
    screen.curadd = i;
    Ok(())
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
    fn scenario_1_unformatted_key_data() {
        let mut s = screen();
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        key_data("A", false, &mut s, &outbound, &codecs, &mut obs).unwrap();
        assert_eq!(s.dc[0], 0xC1);
        assert_eq!(s.curadd, 1);
    }

    #[test]
    fn keying_sets_mdt_on_containing_field() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        key_data("A", false, &mut s, &outbound, &codecs, &mut obs).unwrap();
        assert!(s.mdt(0));
    }

    #[test]
    fn keying_on_attribute_cell_is_rejected() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.curadd = 0;
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        assert!(key_data("A", false, &mut s, &outbound, &codecs, &mut obs).is_err());
    }

    #[test]
    fn keying_in_protected_field_is_rejected() {
        let mut s = screen();
        s.fa[0] = crate::codes::ATTR_PROTECTED;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        assert!(key_data("A", false, &mut s, &outbound, &codecs, &mut obs).is_err());
    }

    #[test]
    fn input_inhibited_when_pwait_set() {
        let mut s = screen();
        let mut outbound = OutboundProcessor::new();
        outbound.interaction.pwait = true;
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        let err = key_data("A", false, &mut s, &outbound, &codecs, &mut obs).unwrap_err();
        assert!(matches!(err, Error::InputInhibited));
    }

    #[test]
    fn scenario_2_erase_input_homes_cursor_and_clears_field() {
        let mut s = screen();
        s.fa[1919] = crate::addressing::bit6(0);
        s.dc[5] = 0xC1;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let mut obs = NullObserver;
        erase_input(&mut s, &outbound, &mut obs).unwrap();
        assert_eq!(s.curadd, 0);
        assert!(s.dc[0..1919].iter().all(|&b| b == 0));
    }

    #[test]
    fn tab_lands_on_field_start_plus_one() {
        let mut s = screen();
        s.fa[80] = 0x40;
        s.fa[160] = 0x40;
        s.curadd = 0;
        let outbound = OutboundProcessor::new();
        tab(&mut s, &outbound).unwrap();
        assert_eq!(s.curadd, 81);
    }

    #[test]
    fn insert_rejected_without_trailing_room() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.fa[3] = 0x40; // field [1,3)
        s.dc[1] = 0xC1;
        s.dc[2] = 0xC2; // fully occupied, no null to absorb an insert
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        assert!(key_data("X", true, &mut s, &outbound, &codecs, &mut obs).is_err());
    }

    #[test]
    fn insert_shifts_remaining_cells_right() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.fa[4] = 0x40; // field [1,4)
        s.dc[1] = 0xC1;
        s.dc[2] = 0xC2;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let mut obs = NullObserver;
        key_data("X", true, &mut s, &outbound, &codecs, &mut obs).unwrap();
        assert_eq!(&s.dc[1..4], &[codecs.encode('X').unwrap().0, 0xC1, 0xC2]);
    }

    #[test]
    fn delete_shifts_left_and_blanks_last_cell() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.fa[4] = 0x40;
        s.dc[1] = 0xC1;
        s.dc[2] = 0xC2;
        s.dc[3] = 0xC3;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let mut obs = NullObserver;
        delete(&mut s, &outbound, &mut obs).unwrap();
        assert_eq!(&s.dc[1..4], &[0xC2, 0xC3, 0]);
        assert!(s.mdt(0));
    }

    #[test]
    fn erase_eof_clears_to_next_field() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.fa[5] = 0x40;
        s.dc[1] = 0xC1;
        s.dc[2] = 0xC2;
        s.curadd = 1;
        let outbound = OutboundProcessor::new();
        let mut obs = NullObserver;
        erase_eof(&mut s, &outbound, &mut obs).unwrap();
        assert!(s.dc[1..5].iter().all(|&b| b == 0));
        assert!(s.mdt(0));
    }
}
