//! Criterion benchmarks for the discovery codec.
//!
//! A searcher decodes every datagram that lands on the discovery port, most of
//! which may be foreign traffic, so rejection cost matters as much as the
//! happy path.
//!
//! Run with:
//! ```bash
//! cargo bench --package lanparty-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lanparty_core::protocol::messages::Announcement;
use lanparty_core::{serialize, try_deserialize, DiscoveryMessage, ValidationRules};

fn make_announcement() -> DiscoveryMessage {
    DiscoveryMessage::ok(Announcement {
        host_id: Some("0e4f1b5c-4d7a-4a51-9d1e-6e0f3c2a9b11".to_string()),
        ..Announcement::lan("192.168.1.42", 7777, 2)
    })
}

fn bench_serialize(c: &mut Criterion) {
    let msg = make_announcement();
    c.bench_function("serialize_announcement", |b| {
        b.iter(|| serialize(black_box(&msg)).unwrap())
    });
}

fn bench_decode_and_validate(c: &mut Criterion) {
    let bytes = serialize(&make_announcement()).unwrap();
    let rules = ValidationRules::default();
    c.bench_function("decode_validate_announcement", |b| {
        b.iter(|| {
            try_deserialize(black_box(&bytes))
                .map(|m| m.validate(&rules))
                .unwrap_or(false)
        })
    });
}

fn bench_reject_foreign(c: &mut Criterion) {
    let garbage = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\n\r\n".to_vec();
    c.bench_function("reject_foreign_datagram", |b| {
        b.iter(|| try_deserialize(black_box(&garbage)))
    });
}

criterion_group!(
    benches,
    bench_serialize,
    bench_decode_and_validate,
    bench_reject_foreign
);
criterion_main!(benches);
