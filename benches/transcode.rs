use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use transcode_engine::{
    ConversionFlags, ConversionOptions, EncodedBuf, EncodingCatalog, Engine, Registry,
};

const TEXT: &str = "Gr\u{fc}\u{df}e aus K\u{f6}ln: caf\u{e9}, na\u{ef}ve, \u{3042}\u{3044}\u{3046}\r\n";

fn bench_unicode(c: &mut Criterion) {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let input = TEXT.repeat(256);
    let options = ConversionOptions::default();

    let mut group = c.benchmark_group("utf8");
    group.throughput(Throughput::Bytes(input.len() as u64));
    for destination in ["UTF-16LE", "UTF-32BE"] {
        group.bench_function(destination, |b| {
            b.iter(|| {
                engine.transcode(
                    black_box(input.as_bytes()),
                    "UTF-8",
                    destination,
                    ConversionFlags::empty(),
                    &options,
                )
            })
        });
    }
    group.bench_function("universal_newline", |b| {
        b.iter(|| {
            engine.transcode(
                black_box(input.as_bytes()),
                "UTF-8",
                "UTF-16BE",
                ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
                &options,
            )
        })
    });
    group.finish();
}

fn bench_two_step(c: &mut Criterion) {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let input = engine
        .transcode(
            TEXT.repeat(256).as_bytes(),
            "UTF-8",
            "UTF-16BE",
            ConversionFlags::empty(),
            &ConversionOptions::default(),
        )
        .unwrap();

    c.bench_function("utf16be_to_latin1_replace", |b| {
        b.iter(|| {
            engine.transcode(
                black_box(&input),
                "UTF-16BE",
                "ISO-8859-1",
                ConversionFlags::UNDEF_REPLACE,
                &ConversionOptions::default(),
            )
        })
    });
}

fn bench_encode_ascii_shortcut(c: &mut Criterion) {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let utf8 = registry.resolve("UTF-8").unwrap();
    let latin1 = registry.resolve("ISO-8859-1").unwrap();
    let buf = EncodedBuf::new("plain ascii text ".repeat(512).into_bytes(), utf8);

    c.bench_function("encode_seven_bit", |b| {
        b.iter(|| {
            engine.encode(
                black_box(&buf),
                &latin1,
                ConversionFlags::empty(),
                &ConversionOptions::default(),
            )
        })
    });
}

criterion_group!(benches, bench_unicode, bench_two_step, bench_encode_ascii_shortcut);
criterion_main!(benches);
