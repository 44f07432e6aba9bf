//! DC Activity agent.
//!
//! `dcactivityd` watches which program owns the foreground and serves the
//! result as JSON over HTTP:
//! - `serve` (default): detection loop plus the HTTP endpoint until SIGINT/SIGTERM
//! - `snapshot`: run a few detection ticks and print the telemetry document
//! - `config`: print the effective configuration
//! - `version`

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dca_common::SERVICE_NAME;
use dca_core::clock::{Clock, MonotonicClock};
use dca_core::config::{load_config, AgentConfig};
use dca_core::daemon::{run_ticks, Agent};
use dca_core::encode::build_state_json;
use dca_core::exit_codes::ExitCode;
use dca_core::logging::{init_logging, LogConfig, LogFormat};
use dca_core::provider::ProcfsProvider;
use dca_core::telemetry::{DetectionPoller, Telemetry};
use tracing::error;

/// DC Activity - foreground program telemetry agent
#[derive(Parser)]
#[command(name = "dcactivityd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq, -qqq turns logging off)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Log format on stderr: human or jsonl
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection and the HTTP endpoint until interrupted (default)
    Serve(ServeArgs),

    /// Run a few detection ticks and print the telemetry JSON
    Snapshot(SnapshotArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Print version information
    Version,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// TCP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// IPv4 address to bind
    #[arg(long)]
    bind: Option<Ipv4Addr>,

    /// Firmware description reported in the telemetry document
    #[arg(long)]
    firmware: Option<String>,

    /// Count samples but never query the process provider
    #[arg(long)]
    no_query: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(bind) = self.bind {
            config.http.bind = bind;
        }
        if let Some(firmware) = &self.firmware {
            config.firmware = Some(firmware.clone());
        }
        if self.no_query {
            config.daemon.allow_query = false;
        }
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Number of detection ticks to run before printing
    #[arg(long, default_value_t = 1)]
    ticks: u64,

    /// Firmware description reported in the telemetry document
    #[arg(long)]
    firmware: Option<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            std::process::exit(code.as_i32());
        }
    };

    let exit_code = run(cli);
    std::process::exit(exit_code.as_i32());
}

fn run(cli: Cli) -> ExitCode {
    let loaded = match load_config(cli.global.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            let err = dca_common::Error::from(err);
            eprintln!("dcactivityd: {}", err.to_json());
            return ExitCode::for_error(&err);
        }
    };

    let log_config = LogConfig::from_env(&loaded.config.logging).with_cli(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.log_format,
    );
    init_logging(&log_config);
    loaded.log_provenance();

    let mut config = loaded.config;
    match cli.command {
        None => run_serve(config, &ServeArgs::default()),
        Some(Commands::Serve(args)) => run_serve(config, &args),
        Some(Commands::Snapshot(args)) => {
            if args.firmware.is_some() {
                config.firmware = args.firmware.clone();
            }
            run_snapshot(&config, args.ticks)
        }
        Some(Commands::Config) => print_config(&config),
        Some(Commands::Version) => {
            print_version();
            ExitCode::Clean
        }
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_serve(mut config: AgentConfig, args: &ServeArgs) -> ExitCode {
    args.apply(&mut config);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        error!(error = %err, "failed to install signal handler");
        return ExitCode::InternalError;
    }

    let provider = ProcfsProvider::new(config.program_table());
    let agent = match Agent::start(provider, MonotonicClock::new(), &config) {
        Ok(agent) => agent,
        Err(err) => {
            error!(code = err.code(), errno = err.errno(), error = %err, "agent failed to start");
            eprintln!("dcactivityd: {}", err.to_json());
            return ExitCode::for_error(&err);
        }
    };

    agent.run(&shutdown);
    agent.shutdown();
    ExitCode::Clean
}

fn run_snapshot(config: &AgentConfig, ticks: u64) -> ExitCode {
    let clock = MonotonicClock::new();
    let telemetry = Telemetry::new(clock.now_secs());
    telemetry.set_firmware(config.firmware.as_deref());

    let provider = ProcfsProvider::new(config.program_table());
    let poller = DetectionPoller::new(provider, clock, config.detection.clone());
    let shutdown = AtomicBool::new(false);
    run_ticks(&poller, &telemetry, &config.daemon, &shutdown, ticks);

    println!("{}", build_state_json(&telemetry));
    ExitCode::Clean
}

fn print_config(config: &AgentConfig) -> ExitCode {
    match config.to_toml() {
        Ok(text) => {
            print!("{}", text);
            ExitCode::Clean
        }
        Err(err) => {
            error!(error = %err, "failed to render configuration");
            ExitCode::InternalError
        }
    }
}

fn print_version() {
    println!("dcactivityd {}", env!("CARGO_PKG_VERSION"));
    println!("service: {}", SERVICE_NAME);
}
