//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, ChatMessage, ClientEvent, MessageTarget, Reaction, ServerEvent};

fn sample_message(text_len: usize) -> ServerEvent {
    ServerEvent::ReceiveMessage(ChatMessage {
        id: "0000018c2f4e5a10".into(),
        sender: "alice".into(),
        target: MessageTarget::Room("general".into()),
        text: "x".repeat(text_len),
        file: None,
        is_read: false,
        reactions: vec![Reaction::new("bob", "👍"), Reaction::new("carol", "🎉")],
        created_at: 1_700_000_000_000,
    })
}

fn bench_encode(c: &mut Criterion) {
    let event = sample_message(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&event)))
    });
    group.bench_function("msgpack_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let text = r#"{"event":"send_message","data":{"text":"hello there","roomId":"general"}}"#;
    let binary = codec::encode(&codec::decode_json::<ClientEvent>(text).unwrap()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_send_message", |b| {
        b.iter(|| codec::decode_json::<ClientEvent>(black_box(text)))
    });
    group.bench_function("msgpack_send_message", |b| {
        b.iter(|| codec::decode::<ClientEvent>(black_box(&binary)))
    });
    group.finish();
}

fn bench_large_message(c: &mut Criterion) {
    let event = sample_message(16 * 1024);

    c.bench_function("encode_json_16KB", |b| {
        b.iter(|| codec::encode_json(black_box(&event)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_large_message);
criterion_main!(benches);
