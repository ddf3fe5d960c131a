use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tn3270rs::outbound::OutboundProcessor;
use tn3270rs::screen::{Screen, ScreenSize};
use tn3270rs::telnet::Framer;
use tn3270rs::traits::NullObserver;

fn sample_write_record() -> Vec<u8> {
    // EW, WCC, SBA 1919, SF unprotected, data "HELLO", SBA 80, SF protected.
    vec![
        0xF5, 0xC3, // EW, WCC
        0x11, 0x7F, 0x7E, // SBA -> 1919 (12-bit form)
        0x1D, 0x40, // SF unprotected
        0xC8, 0xC5, 0xD3, 0xD3, 0xD6, // "HELLO" in EBCDIC
        0x11, 0x40, 0x50, // SBA -> 80
        0x1D, 0x20, // SF protected
    ]
}

fn bench_outbound_write(c: &mut Criterion) {
    let record = sample_write_record();
    c.bench_function("outbound_process_write_record", |b| {
        b.iter(|| {
            let mut screen = Screen::new(ScreenSize::DEFAULT, ScreenSize::DEFAULT);
            let mut outbound = OutboundProcessor::new();
            let mut observer = NullObserver;
            black_box(
                outbound
                    .process_record(black_box(&record), &mut screen, &mut observer)
                    .unwrap(),
            );
        })
    });
}

fn bench_telnet_framer_decode(c: &mut Criterion) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&sample_write_record());
    payload.push(0xFF); // embedded IAC IAC -> unescapes to a single 0xFF
    payload.push(0xFF);
    payload.extend_from_slice(b"more data");
    payload.push(0xFF);
    payload.push(0xEF); // IAC EOR

    c.bench_function("telnet_framer_decode_record", |b| {
        b.iter(|| {
            let mut framer = Framer::new(true, "IBM-DYNAMIC");
            let (events, reply) = framer.feed(black_box(&payload));
            black_box((events, reply));
        })
    });
}

criterion_group!(benches, bench_outbound_write, bench_telnet_framer_decode);
criterion_main!(benches);
