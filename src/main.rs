use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use trellis::{TransformBuilder, TransformConfig, TrellisError};
use trellis_xslt::{OutputMethod, OutputSettings};

/// Applies an XSLT 1.0 stylesheet to an XML document.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The XML document to transform
    input: PathBuf,

    /// The stylesheet. Optional when the configuration file names one.
    #[arg(short, long)]
    stylesheet: Option<PathBuf>,

    /// Write the result here instead of to standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file with stylesheet, parameters, mode and output settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global parameter as name=value; may be repeated
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Initial mode
    #[arg(short, long)]
    mode: Option<String>,

    /// Override the output method (xml, html or text)
    #[arg(long, value_parser = parse_method)]
    method: Option<OutputMethod>,

    /// Indent the output
    #[arg(long, default_value_t = false)]
    indent: bool,
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", value))
}

fn parse_method(value: &str) -> Result<OutputMethod, String> {
    OutputMethod::parse(value).ok_or_else(|| format!("unknown output method '{}'", value))
}

fn run(args: Args) -> Result<(), TrellisError> {
    let mut config = match &args.config {
        Some(path) => TransformConfig::from_file(path)?,
        None => TransformConfig::default(),
    };
    let overrides = TransformConfig {
        stylesheet: args.stylesheet,
        parameters: args.params.into_iter().collect(),
        mode: args.mode,
        output: (args.method.is_some() || args.indent).then(|| OutputSettings {
            method: args.method,
            indent: args.indent.then_some(true),
            ..OutputSettings::default()
        }),
    };
    config.merge(overrides);
    if config.stylesheet.is_none() {
        return Err(TrellisError::Config(
            "No stylesheet given. Use --stylesheet or a configuration file.".to_string(),
        ));
    }

    let transformer = TransformBuilder::new().with_config(&config)?.build()?;
    log::info!("Transforming {}", args.input.display());

    let report = match &args.output {
        Some(path) => {
            let report = transformer.transform_file(&args.input, path)?;
            log::info!("Wrote {}", path.display());
            report
        }
        None => {
            let source = std::fs::read_to_string(&args.input)?;
            let stdout = std::io::stdout();
            let (mut out, report) = transformer.transform_to_writer(&source, stdout.lock())?;
            out.flush()?;
            report
        }
    };
    for message in &report.messages {
        eprintln!("{}", message);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trellis=warn")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
