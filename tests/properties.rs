use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use transcode_engine::detection::{self, BomSniffer, PushbackReader};
use transcode_engine::{
    CallableFallback, Character, CodeRange, ConversionErrorKind, ConversionFlags,
    ConversionOptions, DestBuffer, EncodedBuf, EncodingCatalog, Engine, Error, IndexFallback,
    MappingFallback, Registry,
};

fn convert(engine: &Engine<'_>, input: &[u8], from: &str, to: &str) -> Vec<u8> {
    engine
        .transcode(
            input,
            from,
            to,
            ConversionFlags::empty(),
            &ConversionOptions::default(),
        )
        .unwrap()
}

#[test]
fn round_trip_is_lossless() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let text = "Gr\u{fc}\u{df}e, \u{3053}\u{3093}\u{306b}\u{3061}\u{306f} \u{1F600}\r\n";

    for peer in ["UTF-16LE", "UTF-16BE", "UTF-32LE", "UTF-32BE"] {
        let there = convert(&engine, text.as_bytes(), "UTF-8", peer);
        let back = convert(&engine, &there, peer, "UTF-8");
        assert_eq!(back, text.as_bytes(), "via {peer}");
    }

    let latin = "na\u{ef}ve caf\u{e9}";
    let there = convert(&engine, latin.as_bytes(), "UTF-8", "ISO-8859-1");
    assert_eq!(there.len(), latin.chars().count());
    assert_eq!(convert(&engine, &there, "ISO-8859-1", "UTF-8"), latin.as_bytes());
}

#[test]
fn two_step_path_between_utf16_flavours() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let le = convert(&engine, &[0x00, b'A', 0x30, 0x42], "UTF-16BE", "UTF-16LE");
    assert_eq!(le, [b'A', 0x00, 0x42, 0x30]);
}

#[test]
fn small_destination_matches_large() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let input = "\u{3042}bc\u{e9}".repeat(40);

    let mut small = DestBuffer::new(1);
    let report = engine
        .transcode_into(
            input.as_bytes(),
            "UTF-8",
            "UTF-16BE",
            ConversionFlags::empty(),
            &ConversionOptions::default(),
            &mut small,
        )
        .unwrap();
    assert!(report.grow_count >= 1);
    assert_eq!(report.consumed, input.len());

    let large = convert(&engine, input.as_bytes(), "UTF-8", "UTF-16BE");
    assert_eq!(small.into_vec(), large);
}

#[test]
fn cafe_with_and_without_fallback() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let input = "caf\u{e9}".as_bytes();

    let options = ConversionOptions::with_fallback(MappingFallback::from_pairs([("\u{e9}", "e")]));
    let mut dest = DestBuffer::new(8);
    let report = engine
        .transcode_into(
            input,
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &options,
            &mut dest,
        )
        .unwrap();
    assert_eq!(dest.as_slice(), b"cafe");
    assert_eq!(report.fallback_count, 1);

    let mut dest = DestBuffer::new(8);
    let err = engine
        .transcode_into(
            input,
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &ConversionOptions::default(),
            &mut dest,
        )
        .unwrap_err();
    let Error::Conversion(err) = err else {
        panic!("expected a conversion error, got {err:?}");
    };
    assert_eq!(err.kind, ConversionErrorKind::UndefinedConversion);
    assert_eq!(err.position, 3);
    assert_eq!(err.error_bytes, [0xC3, 0xA9]);
    assert_eq!(dest.as_slice(), b"caf");
}

#[test]
fn fallback_miss_reports_the_error() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let options = ConversionOptions::with_fallback(MappingFallback::from_pairs([("\u{e8}", "e")]));
    let err = engine
        .transcode(
            "caf\u{e9}".as_bytes(),
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "U+00E9 from UTF-8 to US-ASCII");
}

#[test]
fn fallback_text_lands_in_destination_encoding() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let options =
        ConversionOptions::with_fallback(MappingFallback::from_pairs([("\u{2603}", "\u{e9}")]));

    let out = engine
        .transcode(
            "x\u{2603}".as_bytes(),
            "UTF-8",
            "ISO-8859-1",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap();
    assert_eq!(out, [b'x', 0xE9]);

    // Fails in the UTF-8 to ISO-8859-1 step of a two-step path.
    let out = engine
        .transcode(
            &[0x00, b'x', 0x26, 0x03],
            "UTF-16BE",
            "ISO-8859-1",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap();
    assert_eq!(out, [b'x', 0xE9]);

    let out = engine
        .transcode(
            "x\u{2603}".as_bytes(),
            "UTF-8",
            "UTF-16LE",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap();
    assert_eq!(out, [b'x', 0x00, 0x03, 0x26]);

    let err = engine
        .transcode(
            "x\u{2603}".as_bytes(),
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "U+2603 from UTF-8 to US-ASCII");
}

#[test]
fn callable_fallback_through_engine() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let options = ConversionOptions::with_fallback(CallableFallback::new(|ch: &Character<'_>| {
        ch.code_point().map(|cp| format!("<U+{cp:04X}>"))
    }));

    let mut dest = DestBuffer::new(4);
    let report = engine
        .transcode_into(
            "caf\u{e9} \u{2603}".as_bytes(),
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &options,
            &mut dest,
        )
        .unwrap();
    assert_eq!(dest.as_slice(), b"caf<U+00E9> <U+2603>");
    assert_eq!(report.fallback_count, 2);

    let declines = ConversionOptions::with_fallback(CallableFallback::new(|_: &Character<'_>| None));
    let err = engine
        .transcode(
            "caf\u{e9}".as_bytes(),
            "UTF-8",
            "US-ASCII",
            ConversionFlags::empty(),
            &declines,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "U+00E9 from UTF-8 to US-ASCII");
}

#[test]
fn index_fallback_through_engine() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let fallback: IndexFallback = [('\u{2019}', "'".to_string()), ('\u{2603}', "*".to_string())]
        .into_iter()
        .collect();
    let options = ConversionOptions::with_fallback(fallback);

    let input: Vec<u8> = "it\u{2019}s \u{2603}"
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    let out = engine
        .transcode(
            &input,
            "UTF-16LE",
            "ISO-8859-1",
            ConversionFlags::empty(),
            &options,
        )
        .unwrap();
    assert_eq!(out, b"it's *");
}

fn universal_chunks(engine: &Engine<'_>, chunks: &[&[u8]], from: &str) -> Vec<u8> {
    let mut dest = DestBuffer::new(16);
    engine
        .transcode_chunks(
            chunks.iter().copied(),
            from,
            "UTF-8",
            ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
            &ConversionOptions::default(),
            &mut dest,
        )
        .unwrap();
    dest.into_vec()
}

#[test]
fn chunked_input_matches_one_shot() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);

    let split_crlf = universal_chunks(&engine, &[&b"a\r"[..], &b"\nb"[..]], "UTF-8");
    assert_eq!(split_crlf, b"a\nb");
    let one_shot = engine
        .transcode(
            b"a\r\nb",
            "UTF-8",
            "UTF-8",
            ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
            &ConversionOptions::default(),
        )
        .unwrap();
    assert_eq!(split_crlf, one_shot);

    assert_eq!(
        universal_chunks(&engine, &[&b"a\r"[..], &b"\r"[..], &b"\nb\r"[..]], "UTF-8"),
        b"a\n\nb\n"
    );
    assert_eq!(
        universal_chunks(&engine, &[&b"\xE3"[..], &b"\x81\x82\r"[..], &b"\n"[..]], "UTF-8"),
        "\u{3042}\n".as_bytes()
    );
    assert_eq!(
        universal_chunks(&engine, &[&[b'a', 0, b'\r', 0][..], &[b'\n', 0][..]], "UTF-16LE"),
        b"a\n"
    );
}

#[test]
fn chunked_input_rejects_attribute_quoting() {
    let registry = Registry::new();
    let mut dest = DestBuffer::new(16);
    let err = Engine::new(&registry)
        .transcode_chunks(
            [&b"a"[..], &b"b"[..]],
            "UTF-8",
            "UTF-8",
            ConversionFlags::XML_ATTR_QUOTE_DECORATOR,
            &ConversionOptions::default(),
            &mut dest,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption(_)));
    assert!(dest.is_empty());
}

#[test]
fn newline_decorators() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let run = |flags| {
        engine
            .transcode(
                b"a\r\nb\rc\n",
                "UTF-8",
                "UTF-8",
                flags,
                &ConversionOptions::default(),
            )
            .unwrap()
    };
    assert_eq!(run(ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR), b"a\nb\nc\n");
    assert_eq!(run(ConversionFlags::CRLF_NEWLINE_DECORATOR), b"a\r\r\nb\rc\r\n");
    assert_eq!(run(ConversionFlags::CR_NEWLINE_DECORATOR), b"a\r\rb\rc\r");
}

#[test]
fn bom_detection_leaves_payload_next() {
    let registry = Registry::new();
    let sniffer = BomSniffer::new(&registry);

    for input in [&[0xEF, 0xBB, 0xBF, 0x68, 0x69][..], &[0x68, 0x69][..]] {
        let mut source: VecDeque<u8> = input.iter().copied().collect();
        sniffer.sniff(&mut source);
        assert_eq!(source.into_iter().collect::<Vec<_>>(), [0x68, 0x69]);
    }

    let mut reader = PushbackReader::new(&[0xFE, 0xFF, 0x00, 0x68][..]);
    let found = sniffer.sniff(&mut reader).unwrap();
    assert_eq!(found.name(), "UTF-16BE");
    assert_eq!(found.bom(), Some(&[0xFE, 0xFF][..]));

    assert_eq!(detection::detect_bom(&[0xEF, 0xBB, 0xBF]), Some(("UTF-8", 3)));
}

#[test]
fn merge_rules() {
    let registry = Registry::new();
    let utf8 = registry.resolve("UTF-8").unwrap();
    let sjis = registry.resolve("Shift_JIS").unwrap();

    let mut buf = EncodedBuf::empty(utf8.clone());
    assert_eq!(
        buf.append(b"abc", &utf8, CodeRange::Unknown).unwrap(),
        (utf8.clone(), CodeRange::SevenBit)
    );

    let before = (buf.encoding().clone(), buf.code_range());
    assert_eq!(buf.append(b"", &sjis, CodeRange::Broken).unwrap(), before);
    assert_eq!(buf.bytes(), b"abc");

    let mut japanese = EncodedBuf::new(vec![0x82, 0xA0], sjis);
    let err = japanese
        .append("\u{e9}".as_bytes(), &utf8, CodeRange::Unknown)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "incompatible character encodings: Shift_JIS and UTF-8"
    );
}

#[test]
fn encode_reuses_seven_bit_bytes() {
    let registry = Registry::new();
    let engine = Engine::new(&registry);
    let utf8 = registry.resolve("UTF-8").unwrap();
    let latin1 = registry.resolve("ISO-8859-1").unwrap();

    let ascii = EncodedBuf::new(b"plain".to_vec(), utf8.clone());
    let out = engine
        .encode(
            &ascii,
            &latin1,
            ConversionFlags::empty(),
            &ConversionOptions::default(),
        )
        .unwrap();
    assert_eq!(out.encoding(), &latin1);
    assert_eq!(out.bytes(), b"plain");

    let accented = EncodedBuf::new("\u{e9}".as_bytes().to_vec(), utf8);
    let out = engine
        .encode(
            &accented,
            &latin1,
            ConversionFlags::empty(),
            &ConversionOptions::default(),
        )
        .unwrap();
    assert_eq!(out.bytes(), [0xE9]);
    assert_eq!(out.code_range(), CodeRange::Valid);
}

#[test]
fn concurrent_registration_has_one_winner() {
    let registry = Arc::new(Registry::new());
    let base = registry.resolve("UTF-8").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let base = base.clone();
            thread::spawn(move || registry.register("X-MY-UTF8", Some(&base)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::DuplicateEncoding(_)))
    );
    assert!(registry.resolve("x-my-utf8").unwrap().is_ascii_compatible());
}
