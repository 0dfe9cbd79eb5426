//! # transcode CLI - Character Encoding Converter
//!
//! Command-line front end for the conversion engine: convert files between
//! encodings, sniff byte order marks, negotiate open modes and inspect the
//! encoding catalog.

#[cfg(feature = "cli")]
use std::collections::BTreeMap;
#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::{self, Read, Write};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use serde::Serialize;
#[cfg(feature = "cli")]
use tracing::{debug, info};
#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cli")]
use transcode_engine::detection::{self, BomSniffer, PushbackReader};
#[cfg(feature = "cli")]
use transcode_engine::{
    ConversionFlags, ConvpathElement, DestBuffer, EconvOptions, EncodingCatalog, Engine,
    EngineConfig, Error as EngineError, ModeArg, ModeNegotiator, OpenOptions, Registry,
};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// transcode: character encoding conversion pipelines
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "transcode")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Convert a file between character encodings
    Convert(ConvertArgs),

    /// Detect a byte order mark at the start of the input
    Sniff(SniffArgs),

    /// Resolve an open mode and its encoding options
    Negotiate(NegotiateArgs),

    /// List registered encodings
    List(ListArgs),

    /// Display detailed information about an encoding
    Info(InfoArgs),
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ConvertArgs {
    /// Source encoding
    #[arg(short = 'f', long = "from")]
    from: String,

    /// Target encoding
    #[arg(short = 't', long = "to")]
    to: String,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Replace invalid byte sequences
    #[arg(long)]
    invalid_replace: bool,

    /// Replace characters undefined in the target
    #[arg(long)]
    undef_replace: bool,

    /// Replacement string (default: U+FFFD for Unicode targets, ? otherwise)
    #[arg(long)]
    replace: Option<String>,

    /// XML escaping (text, attr)
    #[arg(long)]
    xml: Option<String>,

    /// Newline conversion (universal, crlf, cr, lf)
    #[arg(long)]
    newline: Option<String>,

    /// Fallback mapping for undefined characters, as FROM=TO
    #[arg(long = "fallback", value_parser = parse_fallback)]
    fallback: Vec<(String, String)>,

    /// Explicit conversion path, comma separated (e.g. UTF-8:UTF-16LE,crlf_newline)
    #[arg(long, value_delimiter = ',')]
    convpath: Vec<ConvpathElement>,

    /// Feed the input in chunks of this many bytes, carrying split characters over
    #[arg(long, conflicts_with = "convpath")]
    chunk_size: Option<usize>,

    /// Strip a BOM from the input
    #[arg(long)]
    strip_bom: bool,

    /// Add a BOM to the output
    #[arg(long)]
    add_bom: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct SniffArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct NegotiateArgs {
    /// Mode string, e.g. "r:bom|utf-8" or "w+b"
    mode: Option<String>,

    /// Integer open flags instead of a mode string
    #[arg(long, conflicts_with = "mode")]
    flags: Option<u32>,

    /// Permission, octal
    #[arg(long, value_parser = parse_octal)]
    perm: Option<u32>,

    /// Keyword overrides as JSON, e.g. '{"binmode":true}'
    #[arg(long)]
    options: Option<String>,

    /// File to sniff when the mode asks for a BOM
    #[arg(long)]
    bom_input: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ListArgs {
    /// Show only ASCII-compatible encodings
    #[arg(long)]
    ascii_compatible: bool,

    /// Show aliases
    #[arg(long)]
    aliases: bool,

    /// Show registered converters
    #[arg(long)]
    transcoders: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct InfoArgs {
    /// Encoding to describe
    encoding: String,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
fn parse_fallback(s: &str) -> Result<(String, String)> {
    let (from, to) = s
        .split_once('=')
        .with_context(|| format!("expected FROM=TO, got {s}"))?;
    Ok((from.to_string(), to.to_string()))
}

#[cfg(feature = "cli")]
fn parse_octal(s: &str) -> Result<u32> {
    let digits = s.trim_start_matches("0o");
    u32::from_str_radix(digits, 8).with_context(|| format!("invalid octal permission: {s}"))
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionResult {
    success: bool,
    bytes_processed: usize,
    bytes_written: usize,
    grow_count: usize,
    fallback_count: usize,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionFailure {
    success: bool,
    error: String,
    kind: Option<String>,
    error_bytes: Vec<u8>,
    readagain_bytes: Vec<u8>,
    source_encoding: Option<String>,
    destination_encoding: Option<String>,
    position: Option<usize>,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct SniffResult {
    bom_detected: bool,
    encoding: Option<String>,
    bom_length: usize,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct NegotiationResult {
    mode: String,
    mode_flags: u32,
    open_flags: u32,
    perm: Option<u32>,
    external_encoding: Option<String>,
    internal_encoding: Option<String>,
    conversion_flags: u32,
    decorators: Vec<String>,
    bom_encoding: Option<String>,
    diagnostics: Vec<String>,
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let registry = Registry::with_config(&config).context("Invalid engine configuration")?;

    match cli.command {
        Commands::Convert(ref args) => convert_command(args, &cli, &registry, &config)?,
        Commands::Sniff(ref args) => sniff_command(args, &cli, &registry)?,
        Commands::Negotiate(ref args) => negotiate_command(args, &cli, &registry, &config)?,
        Commands::List(ref args) => list_command(args, &cli, &registry)?,
        Commands::Info(ref args) => info_command(args, &cli, &registry)?,
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(feature = "cli")]
fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    if let Some(path) = path {
        debug!(path = %path.display(), "reading input");
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
    } else {
        let mut buffer = Vec::new();
        io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    }
}

#[cfg(feature = "cli")]
fn convert_command(
    args: &ConvertArgs,
    cli: &Cli,
    registry: &Registry,
    config: &EngineConfig,
) -> Result<()> {
    let start_time = std::time::Instant::now();
    let engine = Engine::with_config(registry, config);

    let econv = EconvOptions {
        invalid: args.invalid_replace.then(|| "replace".to_string()),
        undef: args.undef_replace.then(|| "replace".to_string()),
        replace: args.replace.clone(),
        xml: args.xml.clone(),
        newline: args.newline.clone(),
        fallback: (!args.fallback.is_empty())
            .then(|| args.fallback.iter().cloned().collect::<BTreeMap<_, _>>()),
        ..EconvOptions::default()
    };
    let (flags, options) = econv
        .prepare(registry, ConversionFlags::empty())
        .context("Invalid conversion options")?;

    let mut input = read_input(args.input.as_deref())?;
    if args.strip_bom {
        if let Some((name, len)) = detection::detect_bom(&input) {
            info!(encoding = name, "stripped BOM ({len} bytes)");
            input.drain(..len);
        }
    }

    let mut dest = DestBuffer::new(input.len().saturating_add(config.initial_slack));
    let outcome = if let Some(size) = args.chunk_size {
        engine.transcode_chunks(
            input.chunks(size.max(1)),
            &args.from,
            &args.to,
            flags,
            &options,
            &mut dest,
        )
    } else if args.convpath.is_empty() {
        engine.transcode_into(&input, &args.from, &args.to, flags, &options, &mut dest)
    } else {
        registry
            .pipeline_from_convpath(&args.convpath)
            .and_then(|pipeline| {
                info!(steps = ?pipeline.describe(), "using explicit conversion path");
                engine.run_pipeline(pipeline, &input, flags, &options, &mut dest)
            })
    };

    let report = match outcome {
        Ok(report) => report,
        Err(err) => return report_failure(err, cli),
    };

    let mut output = Vec::with_capacity(dest.len() + 4);
    if args.add_bom {
        if let Some(bom) = registry.resolve(&args.to).and_then(|e| e.bom()) {
            output.extend_from_slice(bom);
        }
    }
    output.extend_from_slice(dest.as_slice());

    if let Some(ref output_path) = args.output {
        fs::write(output_path, &output)
            .with_context(|| format!("Failed to write output file: {}", output_path.display()))?;
        info!(path = %output_path.display(), "wrote output");
    } else {
        io::stdout()
            .write_all(&output)
            .context("Failed to write to stdout")?;
    }

    let processing_time = start_time.elapsed();
    debug!(
        consumed = report.consumed,
        written = output.len(),
        ?processing_time,
        "conversion finished"
    );

    match cli.format {
        OutputFormat::Json => {
            let result = ConversionResult {
                success: true,
                bytes_processed: report.consumed,
                bytes_written: output.len(),
                grow_count: report.grow_count,
                fallback_count: report.fallback_count,
                processing_time_ms: processing_time.as_millis() as u64,
            };
            eprintln!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            if cli.verbose {
                eprintln!("✓ Conversion completed successfully");
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn report_failure(err: EngineError, cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let failure = match &err {
                EngineError::Conversion(conv) => ConversionFailure {
                    success: false,
                    error: conv.to_string(),
                    kind: Some(conv.kind.to_string()),
                    error_bytes: conv.error_bytes.clone(),
                    readagain_bytes: conv.readagain_bytes.clone(),
                    source_encoding: Some(conv.source_encoding.clone()),
                    destination_encoding: Some(conv.destination_encoding.clone()),
                    position: Some(conv.position),
                },
                other => ConversionFailure {
                    success: false,
                    error: other.to_string(),
                    kind: None,
                    error_bytes: Vec::new(),
                    readagain_bytes: Vec::new(),
                    source_encoding: None,
                    destination_encoding: None,
                    position: None,
                },
            };
            println!("{}", serde_json::to_string_pretty(&failure)?);
            std::process::exit(1);
        }
        OutputFormat::Text => Err(err).context("Conversion failed"),
    }
}

#[cfg(feature = "cli")]
fn sniff_command(args: &SniffArgs, cli: &Cli, registry: &Registry) -> Result<()> {
    let source: Box<dyn Read> = match args.input {
        Some(ref path) => Box::new(
            fs::File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };
    let mut reader = PushbackReader::new(source);
    let found = BomSniffer::new(registry).sniff(&mut reader);
    if let Some(err) = reader.take_error() {
        return Err(err).context("Failed to read input");
    }

    let result = SniffResult {
        bom_detected: found.is_some(),
        bom_length: found.as_ref().and_then(|e| e.bom()).map_or(0, <[u8]>::len),
        encoding: found.map(|e| e.name().to_string()),
    };

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => match result.encoding {
            Some(ref name) => println!("BOM detected: {} ({} bytes)", name, result.bom_length),
            None => println!("No BOM detected"),
        },
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn negotiate_command(
    args: &NegotiateArgs,
    cli: &Cli,
    registry: &Registry,
    config: &EngineConfig,
) -> Result<()> {
    let options: OpenOptions = match args.options {
        Some(ref json) => serde_json::from_str(json).context("Invalid --options JSON")?,
        None => OpenOptions::default(),
    };
    let mode = match (&args.mode, args.flags) {
        (Some(s), _) => Some(ModeArg::Str(s.clone())),
        (None, Some(oflags)) => Some(ModeArg::Flags(oflags)),
        (None, None) => None,
    };

    let mut negotiated = ModeNegotiator::with_platform(registry, config.platform)
        .negotiate(mode, args.perm, &options)
        .context("Mode negotiation failed")?;

    let bom_encoding = match args.bom_input {
        Some(ref path) => {
            let file = fs::File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            let mut reader = PushbackReader::new(file);
            negotiated
                .set_encoding_by_bom(registry, &mut reader)
                .map(|e| e.name().to_string())
        }
        None => None,
    };

    let result = NegotiationResult {
        mode: negotiated.mode.to_string(),
        mode_flags: negotiated.mode.flags().bits(),
        open_flags: negotiated.open_flags,
        perm: negotiated.perm,
        external_encoding: negotiated
            .encodings
            .external()
            .map(|e| e.name().to_string()),
        internal_encoding: negotiated
            .encodings
            .internal()
            .map(|e| e.name().to_string()),
        conversion_flags: negotiated.flags.bits(),
        decorators: negotiated
            .flags
            .decorators()
            .iter_names()
            .map(|(name, _)| name.to_string())
            .collect(),
        bom_encoding,
        diagnostics: negotiated.diagnostics.clone(),
    };

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("Mode:              {}", result.mode);
            println!("Mode flags:        {:#010x}", result.mode_flags);
            println!("Open flags:        {:#o}", result.open_flags);
            if let Some(perm) = result.perm {
                println!("Permission:        {perm:#o}");
            }
            println!(
                "External encoding: {}",
                result.external_encoding.as_deref().unwrap_or("(default)")
            );
            println!(
                "Internal encoding: {}",
                result.internal_encoding.as_deref().unwrap_or("(none)")
            );
            println!("Conversion flags:  {:#010x}", result.conversion_flags);
            if !result.decorators.is_empty() {
                println!("Decorators:        {}", result.decorators.join(", "));
            }
            if let Some(ref name) = result.bom_encoding {
                println!("BOM encoding:      {name}");
            }
            for note in &result.diagnostics {
                println!("warning: {note}");
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn list_command(args: &ListArgs, cli: &Cli, registry: &Registry) -> Result<()> {
    let encodings: Vec<_> = registry
        .encodings()
        .into_iter()
        .filter(|e| !args.ascii_compatible || e.is_ascii_compatible())
        .collect();

    match cli.format {
        OutputFormat::Json => {
            let encodings_info: Vec<_> = encodings
                .iter()
                .map(|encoding| {
                    serde_json::json!({
                        "name": encoding.name(),
                        "kind": encoding.kind(),
                        "ascii_compatible": encoding.is_ascii_compatible(),
                        "dummy": encoding.is_dummy(),
                        "aliases": registry.aliases_of(encoding),
                    })
                })
                .collect();
            let mut out = serde_json::json!({ "encodings": encodings_info });
            if args.transcoders {
                out["transcoders"] = serde_json::json!(registry.transcoder_pairs());
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Registered Encodings ({} total):", encodings.len());
            println!();
            for encoding in &encodings {
                let aliases = registry.aliases_of(encoding);
                if args.aliases && !aliases.is_empty() {
                    println!("  {:<14} ({})", encoding.name(), aliases.join(", "));
                } else {
                    println!("  {}", encoding.name());
                }
            }
            if args.transcoders {
                println!();
                println!("Converters:");
                for (source, destination) in registry.transcoder_pairs() {
                    println!("  {source} -> {destination}");
                }
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn info_command(args: &InfoArgs, cli: &Cli, registry: &Registry) -> Result<()> {
    let encoding = registry
        .resolve(&args.encoding)
        .ok_or_else(|| EngineError::UnknownEncoding(args.encoding.clone()))?;
    let aliases = registry.aliases_of(&encoding);

    match cli.format {
        OutputFormat::Json => {
            let info = serde_json::json!({
                "name": encoding.name(),
                "kind": encoding.kind(),
                "min_length": encoding.min_length(),
                "max_length": encoding.max_length(),
                "ascii_compatible": encoding.is_ascii_compatible(),
                "dummy": encoding.is_dummy(),
                "bom": encoding.bom(),
                "aliases": aliases,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            println!("Encoding Information: {}", encoding.name());
            println!("Kind: {:?}", encoding.kind());
            println!(
                "Character length: {}..={} bytes",
                encoding.min_length(),
                encoding.max_length()
            );
            println!(
                "ASCII compatible: {}",
                if encoding.is_ascii_compatible() { "Yes" } else { "No" }
            );
            if encoding.is_dummy() {
                println!("Dummy: Yes");
            }
            if let Some(bom) = encoding.bom() {
                println!("BOM: {bom:02X?}");
            }
            if !aliases.is_empty() {
                println!("Aliases: {}", aliases.join(", "));
            }
        }
    }

    Ok(())
}
