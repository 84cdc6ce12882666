//! Performance benchmarks for the session hot paths
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use bytes::Bytes;
use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use sonic_bridge::core::realtime::audio_pipe;
use sonic_bridge::core::realtime::sonic::messages::{WireEvent, decode_inbound, encode};
use sonic_bridge::core::tools::{order_seed, track_order_on};

/// Benchmark encoding of outbound audio events
fn bench_audio_input_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_input_encoding");
    group.measurement_time(Duration::from_secs(5));

    // 1024 frames of 16-bit mono, the default capture chunk, plus larger chunks
    for frames in [1024usize, 4096, 16384] {
        let chunk = vec![0x5Au8; frames * 2];
        group.throughput(Throughput::Bytes(chunk.len() as u64));
        group.bench_with_input(BenchmarkId::new("frames", frames), &chunk, |b, chunk| {
            b.iter(|| {
                let event = WireEvent::audio_input("prompt", "audio", black_box(chunk));
                encode(&event)
            });
        });
    }

    group.finish();
}

/// Benchmark decoding of inbound server events
fn bench_inbound_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_decoding");
    group.measurement_time(Duration::from_secs(5));

    let text_output = r#"{"event":{"textOutput":{"role":"ASSISTANT","content":"Your order is on its way and should arrive tomorrow."}}}"#;
    let content_start = r#"{"event":{"contentStart":{"role":"ASSISTANT","type":"TEXT","contentId":"c-1","additionalModelFields":"{\"generationStage\":\"SPECULATIVE\"}"}}}"#;
    let audio_output = format!(
        r#"{{"event":{{"audioOutput":{{"content":"{}"}}}}}}"#,
        "AAAA".repeat(4096)
    );

    for (name, msg) in [
        ("text_output", text_output.to_string()),
        ("content_start", content_start.to_string()),
        ("audio_output", audio_output),
    ] {
        group.throughput(Throughput::Bytes(msg.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, msg.len()), &msg, |b, msg| {
            b.iter(|| decode_inbound(black_box(msg)));
        });
    }

    group.finish();
}

/// Benchmark the order tracking tool
fn bench_track_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_order");
    let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap_or_default();

    group.bench_function("seed", |b| b.iter(|| order_seed(black_box("ORD-20240315-1234"))));
    group.bench_function("lookup", |b| {
        b.iter(|| track_order_on(black_box("ORD-20240315-1234"), true, today))
    });

    group.finish();
}

/// Benchmark pushing and draining the audio pipe
fn bench_audio_pipe(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_pipe");
    let chunk = Bytes::from(vec![0u8; 2048]);

    group.bench_function("push_drain_64", |b| {
        b.iter(|| {
            let (writer, mut reader) = audio_pipe();
            for _ in 0..64 {
                writer.push(chunk.clone());
            }
            reader.drain()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_audio_input_encoding,
    bench_inbound_decoding,
    bench_track_order,
    bench_audio_pipe,
);

criterion_main!(benches);
