//! Inbound Builder (C7): AID record construction in Field, Extended-Field,
//! and Character reply modes, plus the Read-Buffer reply.
//!
//! Both `send_aid` and `build_read_buffer` are grounded on the same
//! reference behavior, with one deliberate correction: the reference
//! implementation's Character-mode `SA` tracking compares each group
//! against a zero baseline that is never updated within a field (visible
//! from its own unused `eh_attr`/`fg_attr`/`bg_attr` reassignment), which
//! would re-emit an unchanged attribute's `SA` on every group. This builder
//! instead tracks the last-emitted value per attribute type and only
//! re-emits on an actual change, matching the "value changed" contract.

use crate::addressing::encode_address;
use crate::codec::CodecRegistry;
use crate::codes::{Aid, ATTR_MDT, ORDER_GE, ORDER_SA, ORDER_SBA, XA_BACKGROUND, XA_FOREGROUND, XA_HIGHLIGHT};
use crate::outbound::OutboundProcessor;
use crate::screen::Screen;

/// Build and record (but do not transmit) the inbound record for `aid`.
/// The caller is responsible for handing the returned bytes to the telnet
/// framer / transport.
pub fn send_aid(aid: Aid, screen: &Screen, outbound: &mut OutboundProcessor, _codecs: &CodecRegistry) -> Vec<u8> {
    let mut out = vec![aid.to_byte()];
    if aid.is_short() {
        outbound.interaction.pwait = true;
        outbound.on_aid_sent(aid);
        outbound.record_sent_inbound(out.clone());
        return out;
    }

    out.extend(encode_address(screen.curadd, screen.buffer_size()));

    for (field_addr, attr) in screen.fields() {
        if attr & ATTR_MDT == 0 {
            continue;
        }
        let data_start = screen.advance(field_addr, 1);
        let data_end = {
            let (next, _) = screen.next_field(field_addr, 1);
            if next >= 0 { next as usize } else { field_addr }
        };
        out.push(ORDER_SBA);
        out.extend(encode_address(data_start, screen.buffer_size()));
        emit_field_content(&mut out, screen, outbound, data_start, data_end, false);
    }

    outbound.interaction.pwait = true;
    outbound.on_aid_sent(aid);
    outbound.record_sent_inbound(out.clone());
    out
}

/// Build the Read-Buffer reply: a linear dump of the whole buffer with an
/// `SF`/`SFE` at every field-start cell and nulls preserved in the data
/// runs.
pub fn build_read_buffer(screen: &Screen, outbound: &OutboundProcessor, aid: Aid) -> Vec<u8> {
    let mut out = vec![aid.to_byte()];
    out.extend(encode_address(screen.curadd, screen.buffer_size()));

    if screen.is_unformatted() {
        emit_data_run(&mut out, screen, 0, screen.buffer_size(), true);
        return out;
    }

    for (field_addr, _attr) in screen.fields() {
        emit_field_start(&mut out, screen, field_addr, outbound.reply_mode);
        let data_start = screen.advance(field_addr, 1);
        let data_end = {
            let (next, _) = screen.next_field(field_addr, 1);
            if next >= 0 { next as usize } else { field_addr }
        };
        emit_field_content(&mut out, screen, outbound, data_start, data_end, true);
    }
    out
}

fn emit_field_start(out: &mut Vec<u8>, screen: &Screen, addr: usize, reply_mode: u8) {
    let fattr = screen.fa[addr];
    if reply_mode == 0 {
        out.extend([crate::codes::ORDER_SF, fattr]);
        return;
    }
    let mut pairs = Vec::new();
    if screen.eh[addr] != 0 {
        pairs.push((XA_HIGHLIGHT, screen.eh[addr]));
    }
    if screen.fg[addr] != 0 {
        pairs.push((XA_FOREGROUND, screen.fg[addr]));
    }
    if screen.cs[addr] != 0 {
        pairs.push((crate::codes::XA_CHARSET, screen.cs[addr]));
    }
    if screen.bg[addr] != 0 {
        pairs.push((XA_BACKGROUND, screen.bg[addr]));
    }
    if pairs.is_empty() {
        out.extend([crate::codes::ORDER_SF, fattr]);
        return;
    }
    pairs.push((crate::codes::XA_FIELD_ATTRIBUTE, fattr));
    out.push(crate::codes::ORDER_SFE);
    out.push(pairs.len() as u8);
    for (t, v) in pairs {
        out.push(t);
        out.push(v);
    }
}

/// Emit the data runs `[start, end)` for one field, in the active reply
/// mode. `preserve_nulls` is `false` for AID content (nulls removed) and
/// `true` for the Read-Buffer reply (nulls preserved).
fn emit_field_content(
    out: &mut Vec<u8>,
    screen: &Screen,
    outbound: &OutboundProcessor,
    start: usize,
    end: usize,
    preserve_nulls: bool,
) {
    if outbound.reply_mode == 2 {
        let mut last: Vec<(u8, u8)> = Vec::new();
        for (gs, ge) in screen.group_addrs(start, end) {
            let mut changed = Vec::new();
            for &t in &outbound.reply_cattrs {
                let v = match t {
                    XA_HIGHLIGHT => screen.eh[gs],
                    XA_FOREGROUND => screen.fg[gs],
                    XA_BACKGROUND => screen.bg[gs],
                    _ => continue,
                };
                let prior = last.iter().find(|&&(pt, _)| pt == t).map(|&(_, pv)| pv);
                if prior != Some(v) {
                    changed.push((t, v));
                    if let Some(slot) = last.iter_mut().find(|(pt, _)| *pt == t) {
                        slot.1 = v;
                    } else {
                        last.push((t, v));
                    }
                }
            }
            for (t, v) in changed {
                out.extend([ORDER_SA, t, v]);
            }
            emit_data_run(out, screen, gs, ge, preserve_nulls);
        }
    } else {
        emit_data_run(out, screen, start, end, preserve_nulls);
    }
}

fn emit_data_run(out: &mut Vec<u8>, screen: &Screen, start: usize, end: usize, preserve_nulls: bool) {
    let mut a = start;
    while a != end {
        let b = screen.dc[a];
        if b != 0 || preserve_nulls {
            if screen.cs[a] == 1 {
                out.push(ORDER_GE);
            }
            out.push(b);
        }
        a = screen.advance(a, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::ATTR_MDT;
    use crate::screen::ScreenSize;

    fn screen() -> Screen {
        Screen::new(ScreenSize::new(24, 80), ScreenSize::new(24, 80))
    }

    #[test]
    fn clear_is_a_bare_aid_byte() {
        let s = screen();
        let mut outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let rec = send_aid(Aid::Clear, &s, &mut outbound, &codecs);
        assert_eq!(rec, vec![Aid::Clear.to_byte()]);
    }

    #[test]
    fn scenario_6_enter_build() {
        let mut s = screen();
        s.fa[0] = 0x40; // unprotected, MDT initially off
        s.dc[1] = 0xC8; // 'H'
        s.dc[2] = 0xC9; // 'I'
        s.set_mdt(0);
        s.curadd = 3;

        let mut outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let rec = send_aid(Aid::Enter, &s, &mut outbound, &codecs);

        let mut expected = vec![Aid::Enter.to_byte()];
        expected.extend(encode_address(3, s.buffer_size()));
        expected.push(ORDER_SBA);
        expected.extend(encode_address(1, s.buffer_size()));
        expected.extend([0xC8, 0xC9]);
        assert_eq!(rec, expected);
        assert_eq!(s.fa[0] & ATTR_MDT, 1);
    }

    #[test]
    fn character_mode_emits_sa_only_on_change() {
        let mut s = screen();
        s.fa[0] = 0x41; // unprotected, MDT set
        s.fa[4] = 0x40; // bounds the field to [1, 4)
        s.dc[1] = 0xC1;
        s.fg[1] = 0xF2;
        s.dc[2] = 0xC2;
        s.fg[2] = 0xF2; // same fg, should not repeat SA
        s.dc[3] = 0xC3;
        s.fg[3] = 0xF3; // changed, should emit SA again

        let mut outbound = OutboundProcessor::new();
        outbound.reply_mode = 2;
        outbound.reply_cattrs = vec![XA_FOREGROUND];
        let codecs = CodecRegistry::default();
        let rec = send_aid(Aid::Enter, &s, &mut outbound, &codecs);

        let sa_count = rec.windows(3).filter(|w| w[0] == ORDER_SA && w[1] == XA_FOREGROUND).count();
        assert_eq!(sa_count, 2);
    }

    #[test]
    fn null_cells_are_removed_from_aid_content() {
        let mut s = screen();
        s.fa[0] = 0x41;
        s.dc[1] = 0x00;
        s.dc[2] = 0xC1;
        let mut outbound = OutboundProcessor::new();
        let codecs = CodecRegistry::default();
        let rec = send_aid(Aid::Enter, &s, &mut outbound, &codecs);
        assert!(!rec.contains(&0x00));
    }

    #[test]
    fn read_buffer_preserves_nulls_and_emits_sf() {
        let mut s = screen();
        s.fa[5] = 0x40;
        s.dc[6] = 0x00;
        s.dc[7] = 0xC1;
        let outbound = OutboundProcessor::new();
        let rec = build_read_buffer(&s, &outbound, Aid::None);
        assert!(rec.windows(2).any(|w| w == [crate::codes::ORDER_SF, 0x40]));
        // the field's content run starts right after the SF: null preserved,
        // then the 'A' byte.
        assert!(rec
            .windows(4)
            .any(|w| w == [crate::codes::ORDER_SF, 0x40, 0x00, 0xC1]));
    }

    #[test]
    fn read_buffer_uses_sfe_when_extended_attrs_present() {
        let mut s = screen();
        s.fa[0] = 0x40;
        s.fg[0] = 0xF2;
        let outbound = OutboundProcessor::new();
        let rec = build_read_buffer(&s, &outbound, Aid::None);
        assert_eq!(rec[3], crate::codes::ORDER_SFE);
    }
}
</content>
