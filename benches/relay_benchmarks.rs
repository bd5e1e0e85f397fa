//! Performance benchmarks for WaaV Relay
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::time::Duration;
use waav_relay::core::audio;
use waav_relay::core::envelope::{ClientEnvelope, ServerEnvelope};
use waav_relay::core::realtime::openai::EventInterpreter;

/// 20 ms of 24 kHz audio
const FRAME_SAMPLES: usize = 480;

fn sine_frame(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| ((i as f32 * 0.05).sin() * 12_000.0) as i16)
        .collect()
}

/// Benchmark base64 PCM16 encode/decode at common frame sizes
fn bench_audio_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_codec");
    group.measurement_time(Duration::from_secs(5));

    for frames in [1usize, 10, 50] {
        let samples = sine_frame(FRAME_SAMPLES * frames);
        let encoded = audio::encode_samples(&samples);

        group.throughput(Throughput::Bytes((samples.len() * 2) as u64));
        group.bench_with_input(BenchmarkId::new("encode", frames), &samples, |b, s| {
            b.iter(|| audio::encode_samples(black_box(s)));
        });
        group.bench_with_input(BenchmarkId::new("decode", frames), &encoded, |b, e| {
            b.iter(|| audio::decode_samples(black_box(e)));
        });
    }

    group.finish();
}

/// Benchmark client envelope parsing and validation
fn bench_envelope_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_parsing");
    group.measurement_time(Duration::from_secs(5));

    let append = json!({
        "type": "append_audio",
        "data": audio::encode_samples(&sine_frame(FRAME_SAMPLES)),
    })
    .to_string();
    let user_message = json!({
        "type": "user_message",
        "data": "Hello, this is a test message for the assistant. ".repeat(10),
    })
    .to_string();
    let tool_response = json!({
        "type": "tool_response",
        "tool": "get_weather",
        "result": { "temp_c": 18, "conditions": "cloudy", "wind_kph": 12 },
    })
    .to_string();

    for (name, text) in [
        ("append_audio", &append),
        ("user_message", &user_message),
        ("tool_response", &tool_response),
    ] {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, text.len()), text, |b, t| {
            b.iter(|| {
                let envelope = ClientEnvelope::parse(black_box(t)).unwrap();
                envelope.validate().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark upstream event interpretation and wrapping for the client
fn bench_upstream_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("upstream_events");
    group.measurement_time(Duration::from_secs(5));

    let audio_delta = json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": "item_1",
        "delta": audio::encode_samples(&sine_frame(FRAME_SAMPLES)),
    })
    .to_string();
    let transcript_delta = json!({
        "type": "response.audio_transcript.delta",
        "response_id": "resp_1",
        "item_id": "item_1",
        "delta": "Hello there",
    })
    .to_string();

    for (name, text) in [
        ("audio_delta", &audio_delta),
        ("transcript_delta", &transcript_delta),
    ] {
        group.bench_with_input(BenchmarkId::new("interpret", name), text, |b, t| {
            let mut interpreter = EventInterpreter::new();
            b.iter(|| interpreter.interpret(black_box(t)));
        });
    }

    let event: serde_json::Value = serde_json::from_str(&transcript_delta).unwrap();
    group.bench_function("wrap_and_serialize", |b| {
        b.iter(|| {
            let envelope = ServerEnvelope::ConversationUpdated {
                event: black_box(event.clone()),
            };
            serde_json::to_string(&envelope).unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_audio_codec,
    bench_envelope_parsing,
    bench_upstream_events
);
criterion_main!(benches);
