use criterion::{black_box, criterion_group, criterion_main, Criterion};
use streamchat::protocol::{Decoder, DecoderChain, ProviderKind, StreamDecoder, ThinkTagFilter};
use streamchat::stream::Utf8Decoder;

const TOKENS: usize = 512;

fn openai_body() -> String {
    let mut body = String::new();
    for i in 0..TOKENS {
        body.push_str(&format!(
            "data: {{\"id\":\"chatcmpl-1\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token {i} \"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn ollama_body() -> String {
    let mut body = String::new();
    for i in 0..TOKENS {
        body.push_str(&format!(
            "{{\"model\":\"llama3\",\"message\":{{\"role\":\"assistant\",\"content\":\"token {i} \"}},\"done\":false}}\n"
        ));
    }
    body.push_str("{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n");
    body
}

fn gemini_body() -> String {
    let mut body = String::new();
    for i in 0..TOKENS {
        body.push_str(&format!(
            "{{\"candidates\":[{{\"content\":{{\"role\":\"model\",\"parts\":[{{\"text\":\"token {i} \"}}]}}}}]}}\n"
        ));
    }
    body.push_str("{\"candidates\":[{\"content\":{\"parts\":[]},\"finishReason\":\"STOP\"}]}\n");
    body
}

/// Split on a fixed stride so records straddle chunk boundaries.
fn chunked(body: &str, stride: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < body.len() {
        let mut end = (start + stride).min(body.len());
        while !body.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(body[start..end].to_string());
        start = end;
    }
    chunks
}

fn bench_provider_decoders(c: &mut Criterion) {
    for (name, provider, body) in [
        ("decode_openai_sse_512", ProviderKind::OpenAi, openai_body()),
        ("decode_ollama_ndjson_512", ProviderKind::Ollama, ollama_body()),
        ("decode_gemini_ndjson_512", ProviderKind::Gemini, gemini_body()),
    ] {
        let chunks = chunked(&body, 61);
        let mut decoder = Decoder::new(provider);
        let mut events = Vec::with_capacity(TOKENS * 2);
        c.bench_function(name, |b| {
            b.iter(|| {
                decoder.reset();
                events.clear();
                for chunk in &chunks {
                    decoder.feed(black_box(chunk), &mut events);
                }
                decoder.end_of_input(&mut events);
                black_box(events.len())
            });
        });
    }
}

fn bench_think_filter(c: &mut Criterion) {
    let mut body = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"<think>\"}}]}\n\n");
    body.push_str(&openai_body().replace("data: [DONE]\n\n", ""));
    body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"</think>done\"}}]}\n\ndata: [DONE]\n\n");
    let chunks = chunked(&body, 61);

    let mut chain =
        DecoderChain::new(ProviderKind::OpenAi).with_think_filter(ThinkTagFilter::default());
    let mut events = Vec::with_capacity(TOKENS * 2);
    c.bench_function("decode_openai_think_filter_512", |b| {
        b.iter(|| {
            chain.reset();
            events.clear();
            for chunk in &chunks {
                chain.feed(black_box(chunk), &mut events);
            }
            chain.end_of_input(&mut events);
            black_box(events.len())
        });
    });
}

fn bench_utf8_decoder(c: &mut Criterion) {
    let body = "héllo wörld 🌍 ".repeat(1024).into_bytes();
    let mut decoder = Utf8Decoder::new();
    c.bench_function("utf8_decode_split_16k", |b| {
        b.iter(|| {
            decoder.reset();
            let mut decoded = 0;
            for chunk in body.chunks(7) {
                decoded += decoder.decode(black_box(chunk)).len();
            }
            decoded += decoder.finish().len();
            black_box(decoded)
        });
    });
}

criterion_group!(benches, bench_provider_decoders, bench_think_filter, bench_utf8_decoder);
criterion_main!(benches);
