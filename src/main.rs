use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use zejit::config::{self, BridgeConfig, DriverKind};
use zejit::BridgeError;

#[derive(Parser)]
#[command(
    name = "zejit",
    version,
    about = "JIT-compile an LLVM IR module and run its entry point against a Level Zero GPU"
)]
struct Cli {
    /// SPIR-V kernel payload handed to the entry point
    payload: PathBuf,
    /// Textual LLVM IR module to compile
    #[arg(long, value_name = "PATH", default_value = config::DEFAULT_IR_PATH)]
    ir: PathBuf,
    /// Entry point to resolve and call
    #[arg(long, value_name = "NAME", default_value = config::DEFAULT_ENTRY)]
    entry: String,
    /// Device driver: level-zero or reference (default: $ZEJIT_DRIVER or level-zero)
    #[arg(long, value_name = "DRIVER")]
    driver: Option<String>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            e.render();
            process::exit(e.exit_code());
        }
    };

    match zejit::run(&config) {
        Ok(report) => {
            let values: Vec<String> = report.output.iter().map(|v| v.to_string()).collect();
            println!("C = [{}]", values.join(", "));
        }
        Err(e) => {
            e.render();
            process::exit(e.exit_code());
        }
    }
}

fn build_config(cli: Cli) -> Result<BridgeConfig, BridgeError> {
    let mut config = BridgeConfig::new(cli.payload)
        .with_ir_path(cli.ir)
        .with_entry(cli.entry)
        .with_env(config::process_env)
        .map_err(BridgeError::Config)?;
    if let Some(driver) = cli.driver {
        let driver = driver.parse::<DriverKind>().map_err(BridgeError::Config)?;
        config = config.with_driver(driver);
    }
    Ok(config)
}
