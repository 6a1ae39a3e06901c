//! lanetile - Main Entry Point
//!
//! Plans how an operator's workload is tiled over the compute lanes of a
//! target and prints the plan, its JSON form, or the serialized record.

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use lanetile_session::{find_config, Config, Session};
use lanetile_shape::{Axis, DType, Shape};
use lanetile_target::{parse_platform, Preset};
use lanetile_tiling::{OpAttrs, Operand, Plan, ReduceMode, TilingInput, TilingRecord};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Tiling planner for parallel compute lanes with bounded scratch memory
#[derive(Parser, Debug)]
#[command(name = "lanetile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the nearest lanetile.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan one operator invocation
    Plan(PlanArgs),

    /// Decode a serialized tiling record
    Decode {
        /// Record file written by `plan --record`
        file: Utf8PathBuf,
    },

    /// List the registered operators
    Ops,

    /// List the platform presets
    Presets,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// Operator name
    operator: String,

    /// Operand as `name:shape:dtype`, e.g. `x:4x4x8:f32`
    #[arg(short = 'x', long = "operand", value_name = "SPEC", value_parser = parse_operand)]
    operands: Vec<Operand>,

    /// JSON file holding the operands and attributes
    #[arg(short, long, value_name = "FILE", conflicts_with = "operands")]
    input: Option<Utf8PathBuf>,

    /// Platform preset or descriptor (`lanes=48,scratch=192k,align=32`)
    #[arg(short, long)]
    platform: Option<String>,

    /// Partition axis
    #[arg(long, allow_hyphen_values = true)]
    axis: Option<i64>,

    /// Reduction window length
    #[arg(long)]
    window: Option<u64>,

    /// Reduction window stride
    #[arg(long)]
    stride: Option<u64>,

    /// Scatter reduction (`none` or `add`)
    #[arg(long)]
    reduce: Option<ReduceMode>,

    /// Single-buffer scratch slots
    #[arg(long)]
    single_buffer: bool,

    /// Reject plans that need atomic accumulation
    #[arg(long)]
    deterministic: bool,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,

    /// Print the serialized record as hex
    #[arg(long, conflicts_with = "json")]
    hex: bool,

    /// Write the serialized record to a file
    #[arg(long, value_name = "FILE")]
    record: Option<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Plan(ref args) => run_plan(args, cli.config.as_deref())?,
        Commands::Decode { ref file } => decode_record(file)?,
        Commands::Ops => list_ops(),
        Commands::Presets => list_presets(),
    }

    Ok(())
}

/// Parse an `name:shape:dtype` operand.
fn parse_operand(spec: &str) -> Result<Operand, String> {
    let mut parts = spec.splitn(3, ':');
    let (Some(name), Some(shape), Some(dtype)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected name:shape:dtype, got `{spec}`"));
    };
    if name.is_empty() {
        return Err(format!("operand `{spec}` has no name"));
    }
    let shape: Shape = shape.parse().map_err(|e| format!("{e}"))?;
    let dtype: DType = dtype.parse().map_err(|e| format!("{e}"))?;
    Ok(Operand::new(name, shape, dtype))
}

/// Load the session from an explicit or discovered configuration file.
fn load_session(config: Option<&Utf8Path>) -> Result<Session> {
    let path = match config {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            Utf8PathBuf::from_path_buf(cwd).ok().and_then(find_config)
        }
    };

    let config = match path {
        Some(path) => {
            debug!("Using configuration {}", path);
            Config::load(&path).with_context(|| format!("failed to load {path}"))?
        }
        None => Config::default(),
    };
    Session::new(&config).context("invalid platform configuration")
}

/// Build the tiling input from the command line or an input file.
fn read_input(args: &PlanArgs) -> Result<TilingInput> {
    let mut input = match &args.input {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {path}"))?;
            serde_json::from_str(&content).with_context(|| format!("invalid input file {path}"))?
        }
        None => TilingInput::new(args.operands.clone()),
    };
    if input.operands.is_empty() {
        bail!("no operands given; pass --operand or --input");
    }

    let attrs: &mut OpAttrs = &mut input.attrs;
    if let Some(axis) = args.axis {
        attrs.axis = Some(Axis::new(axis));
    }
    if args.window.is_some() {
        attrs.window = args.window;
    }
    if args.stride.is_some() {
        attrs.stride = args.stride;
    }
    if let Some(reduce) = args.reduce {
        attrs.reduce = reduce;
    }
    Ok(input)
}

/// Plan one operator invocation and print the result.
fn run_plan(args: &PlanArgs, config: Option<&Utf8Path>) -> Result<()> {
    let mut session = load_session(config)?;
    if let Some(platform) = &args.platform {
        let limits = parse_platform(platform).context("invalid --platform")?;
        session = session.with_limits(limits);
    }
    if args.single_buffer {
        session.options_mut().double_buffer = false;
    }
    if args.deterministic {
        session.options_mut().deterministic = true;
    }

    let input = read_input(args)?;
    info!(
        "Planning {} with {} operand(s) on {}",
        args.operator,
        input.operands.len(),
        session.limits()
    );

    let plan = match session.plan(&args.operator, &input) {
        Ok(plan) => plan,
        Err(e) => {
            warn!("Planning failed for {}", args.operator);
            return Err(e.into());
        }
    };

    if let Some(path) = &args.record {
        std::fs::write(path, plan.record.to_bytes())
            .with_context(|| format!("failed to write {path}"))?;
        info!("Wrote {} byte record to {}", TilingRecord::ENCODED_LEN, path);
    }

    print_plan(&plan, args)
}

fn print_plan(plan: &Plan, args: &PlanArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else if args.hex {
        println!("{}", to_hex(&plan.record.to_bytes()));
    } else {
        print!("{plan}");
    }
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .chunks(32)
        .map(|line| line.iter().map(|b| format!("{b:02x}")).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode a record file and print it as JSON.
fn decode_record(file: &Utf8Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {file}"))?;
    let record =
        TilingRecord::from_bytes(&bytes).with_context(|| format!("invalid record {file}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// List the registered operators
fn list_ops() {
    let session = Session::with_defaults();
    let registry = session.registry();
    for name in registry.names() {
        if let Ok(strategy) = registry.get(name) {
            println!("{name:<18} {}", strategy.operands().join(", "));
        }
    }
}

/// List the platform presets
fn list_presets() {
    for preset in Preset::ALL {
        println!("{:<12} {}", preset.name(), preset.limits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_operand() {
        let operand = parse_operand("data:4x4x8:f32").unwrap();
        assert_eq!(operand.name, "data");
        assert_eq!(operand.shape.dims(), &[4, 4, 8]);
        assert_eq!(operand.dtype, DType::Float32);

        assert!(parse_operand("data:4x4x8").is_err());
        assert!(parse_operand(":4:f32").is_err());
        assert!(parse_operand("x:4xq:f32").is_err());
        assert!(parse_operand("x:4:f33").is_err());
    }

    #[test]
    fn test_parse_plan_command() {
        let cli = Cli::try_parse_from([
            "lanetile",
            "plan",
            "gather_elements",
            "-x",
            "data:4x4x8:f32",
            "-x",
            "index:4x4x2:i32",
            "--axis",
            "-1",
            "--platform",
            "edge-8",
            "--json",
        ])
        .unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.operator, "gather_elements");
        assert_eq!(args.operands.len(), 2);
        assert_eq!(args.axis, Some(-1));
        assert!(args.json);

        let input = read_input(&args).unwrap();
        assert_eq!(input.attrs.axis, Some(Axis::last()));
    }

    #[test]
    fn test_conflicting_outputs() {
        assert!(Cli::try_parse_from(["lanetile", "plan", "elementwise", "--json", "--hex"]).is_err());
    }

    #[test]
    fn test_read_input_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("input.json")).unwrap();
        std::fs::write(
            &path,
            r#"{"operands": [{"name": "x", "shape": [8, 64], "dtype": "float32"}],
                "attrs": {"window": 4}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "lanetile",
            "plan",
            "window_reduce",
            "--input",
            path.as_str(),
            "--stride",
            "2",
        ])
        .unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        let input = read_input(&args).unwrap();
        assert_eq!(input.attrs.window, Some(4));
        assert_eq!(input.attrs.stride, Some(2));
    }

    #[test]
    fn test_missing_operands() {
        let cli = Cli::try_parse_from(["lanetile", "plan", "elementwise"]).unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert!(read_input(&args).is_err());
    }

    #[test]
    fn test_hex_lines() {
        let hex = to_hex(&[0xab; 40]);
        let lines: Vec<_> = hex.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 64);
        assert_eq!(lines[1], "ab".repeat(8));
    }
}
