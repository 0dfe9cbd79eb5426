use std::collections::VecDeque;

use pretty_assertions::assert_eq;
use transcode_engine::mode::open_flags;
use transcode_engine::{
    ConversionFlags, EngineConfig, Error, ModeArg, ModeFlags, ModeNegotiator, Negotiated,
    Newline, OpenOptions, Platform, Registry,
};

fn unix(registry: &Registry, mode: &str, options: &OpenOptions) -> Result<Negotiated, Error> {
    ModeNegotiator::with_platform(registry, Platform::Unix).negotiate(
        Some(mode.into()),
        None,
        options,
    )
}

fn pair(n: &Negotiated) -> (Option<String>, Option<String>) {
    (
        n.encodings.external().map(|e| e.name().to_string()),
        n.encodings.internal().map(|e| e.name().to_string()),
    )
}

fn some(name: &str) -> Option<String> {
    Some(name.to_string())
}

#[test]
fn documented_mode_strings() {
    let registry = Registry::new();
    let none = OpenOptions::default();

    let cases = [
        ("r", ModeFlags::READABLE, (None, None)),
        (
            "w",
            ModeFlags::WRITABLE | ModeFlags::CREATE | ModeFlags::TRUNC,
            (None, None),
        ),
        (
            "rb",
            ModeFlags::READABLE | ModeFlags::BINMODE,
            (some("ASCII-8BIT"), None),
        ),
        ("r+", ModeFlags::READWRITE, (None, None)),
        ("r:UTF-8", ModeFlags::READABLE, (some("UTF-8"), None)),
        (
            "r:UTF-8:EUC-JP",
            ModeFlags::READABLE,
            (some("UTF-8"), some("EUC-JP")),
        ),
    ];

    for (mode, flags, encodings) in cases {
        let n = unix(&registry, mode, &none).unwrap();
        assert_eq!(n.mode.flags(), flags, "{mode}");
        assert_eq!(pair(&n), encodings, "{mode}");
    }
}

#[test]
fn binmode_and_textmode_never_coexist() {
    let registry = Registry::new();
    let both = OpenOptions {
        binmode: Some(true),
        textmode: Some(true),
        ..OpenOptions::default()
    };
    for mode in ["r", "w", "rb", "rt", "r:UTF-8"] {
        assert_eq!(
            unix(&registry, mode, &both).unwrap_err(),
            Error::BothTextAndBinmode
        );
    }
    assert_eq!(
        unix(&registry, "rt", &OpenOptions { binmode: Some(true), ..OpenOptions::default() })
            .unwrap_err(),
        Error::BothTextAndBinmode
    );
}

#[test]
fn binmode_option_defaults_to_binary_encoding() {
    let registry = Registry::new();
    let options = OpenOptions {
        binmode: Some(true),
        ..OpenOptions::default()
    };
    let n = unix(&registry, "r", &options).unwrap();
    assert!(n.mode.is_binary());
    assert_eq!(pair(&n), (some("ASCII-8BIT"), None));

    let options = OpenOptions {
        binmode: Some(true),
        external_encoding: Some("UTF-16LE".into()),
        ..OpenOptions::default()
    };
    let n = unix(&registry, "r", &options).unwrap();
    assert_eq!(pair(&n), (some("UTF-16LE"), None));
}

#[test]
fn errors_leave_nothing_behind() {
    let registry = Registry::new();
    let options = OpenOptions {
        encoding: Some("UTF-8".into()),
        ..OpenOptions::default()
    };
    assert_eq!(
        unix(&registry, "r:UTF-8", &options).unwrap_err().to_string(),
        "encoding specified twice"
    );
    assert_eq!(
        unix(&registry, "r", &OpenOptions {
            external_encoding: Some("NOPE".into()),
            ..OpenOptions::default()
        })
        .unwrap_err()
        .to_string(),
        "unknown encoding name - NOPE"
    );
    assert_eq!(
        unix(&registry, "r:UTF-16BE", &OpenOptions::default())
            .unwrap_err()
            .to_string(),
        "ASCII incompatible encoding needs binmode"
    );
}

#[test]
fn encoding_option_string() {
    let registry = Registry::new();
    let options: OpenOptions =
        serde_json::from_str(r#"{"encoding":"ISO-8859-1:UTF-8"}"#).unwrap();
    let n = unix(&registry, "r", &options).unwrap();
    assert_eq!(pair(&n), (some("ISO-8859-1"), some("UTF-8")));
    assert!(n.diagnostics.is_empty());
}

#[test]
fn identical_internal_is_dropped_with_diagnostic() {
    let registry = Registry::new();
    let options = OpenOptions {
        external_encoding: Some("utf-8".into()),
        internal_encoding: Some("UTF-8".into()),
        ..OpenOptions::default()
    };
    let n = unix(&registry, "r", &options).unwrap();
    assert_eq!(pair(&n), (some("UTF-8"), None));
    assert_eq!(n.diagnostics.len(), 1);
    assert!(n.diagnostics[0].starts_with("ignoring internal encoding"));
}

#[test]
fn default_internal_applies_without_explicit_encodings() {
    let registry = Registry::with_config(&EngineConfig {
        default_internal: Some("UTF-16LE".into()),
        ..EngineConfig::default()
    })
    .unwrap();
    let n = unix(&registry, "r", &OpenOptions::default()).unwrap();
    assert_eq!(pair(&n), (some("UTF-8"), some("UTF-16LE")));

    let n = unix(&registry, "r:ISO-8859-1", &OpenOptions::default()).unwrap();
    assert_eq!(pair(&n), (some("ISO-8859-1"), some("UTF-16LE")));

    let n = unix(&registry, "rb", &OpenOptions::default()).unwrap();
    assert_eq!(pair(&n), (some("ASCII-8BIT"), None));
}

#[test]
fn bom_prefix_without_bom_falls_back() {
    let registry = Registry::new();
    let mut n = unix(&registry, "r:bom|utf-8", &OpenOptions::default()).unwrap();
    assert!(n.mode.contains(ModeFlags::SETENC_BY_BOM));

    let mut source: VecDeque<u8> = VecDeque::from(vec![0x68, 0x69]);
    assert!(n.set_encoding_by_bom(&registry, &mut source).is_none());
    assert_eq!(pair(&n), (some("UTF-8"), None));
    assert!(!n.mode.contains(ModeFlags::SETENC_BY_BOM));
    assert!(n.mode.contains(ModeFlags::BOM_SNIFF));
    assert_eq!(Vec::from(source), [0x68, 0x69]);
}

#[test]
fn bom_prefix_with_utf8_bom() {
    let registry = Registry::new();
    let mut n = unix(&registry, "r:BOM|UTF-8", &OpenOptions::default()).unwrap();
    let mut source: VecDeque<u8> = VecDeque::from(vec![0xEF, 0xBB, 0xBF, 0x68, 0x69]);
    let found = n.set_encoding_by_bom(&registry, &mut source).unwrap();
    assert_eq!(found.name(), "UTF-8");
    assert_eq!(Vec::from(source), [0x68, 0x69]);

    // A second call is a no-op once the flag is cleared.
    let mut again: VecDeque<u8> = VecDeque::from(vec![0xEF, 0xBB, 0xBF]);
    assert!(n.set_encoding_by_bom(&registry, &mut again).is_none());
    assert_eq!(again.len(), 3);
}

#[test]
fn integer_flags_are_passed_through() {
    let registry = Registry::new();
    let oflags = open_flags::WRONLY | open_flags::APPEND | open_flags::CREAT;
    let n = ModeNegotiator::with_platform(&registry, Platform::Unix)
        .negotiate(Some(ModeArg::Flags(oflags)), Some(0o600), &OpenOptions::default())
        .unwrap();
    assert_eq!(n.open_flags, oflags);
    assert_eq!(n.perm, Some(0o600));
    assert_eq!(n.mode.to_string(), "a");
}

#[test]
fn options_mode_and_perm() {
    let registry = Registry::new();
    let options: OpenOptions =
        serde_json::from_str(r#"{"mode":"w:UTF-16LE","perm":420,"newline":"crlf"}"#).unwrap();
    let n = ModeNegotiator::with_platform(&registry, Platform::Unix)
        .negotiate(None, None, &options)
        .unwrap();
    assert_eq!(pair(&n), (some("UTF-16LE"), None));
    assert_eq!(n.perm, Some(0o644));
    assert_eq!(n.flags.newline(), Newline::Crlf);
    assert!(n.mode.is_text());
}

#[test]
fn windows_defaults_to_text_mode() {
    let registry = Registry::new();
    let negotiator = ModeNegotiator::with_platform(&registry, Platform::Windows);

    let n = negotiator
        .negotiate(None, None, &OpenOptions::default())
        .unwrap();
    assert!(n.mode.is_text());
    assert_eq!(n.flags.newline(), Newline::Universal);

    let n = negotiator
        .negotiate(Some("rb".into()), None, &OpenOptions::default())
        .unwrap();
    assert!(!n.mode.is_text());
    assert_eq!(n.flags & ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR, ConversionFlags::empty());
}
