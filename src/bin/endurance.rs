//! CLI driver for the endurance-test supervisor: continuous erase/program/
//! verify cycling against a connected device for flash-reliability
//! characterization (`spec.md` §4.4, §6).

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ocd::endurance::{
    connect, default_baud, install_sigint_handler, parse_xtal, CancelToken, EnduranceConfig,
    StateFile, Supervisor,
};
use ocd::session::DebugSession;

/// Drives continuous erase/program/verify cycles for device-reliability
/// characterization.
#[derive(Debug, Parser)]
#[command(name = "ocd-endurance")]
struct Cli {
    /// Serial port, or "auto" to probe the platform candidate list.
    #[arg(short = 'p', default_value = "auto")]
    port: String,

    /// Baud rate. Defaults to 115200 on Unix, 57600 on Windows.
    #[arg(short = 'b')]
    baud: Option<u32>,

    /// Target crystal frequency: digits with an optional k/K/M multiplier
    /// and optional trailing Hz, e.g. "20MHz", "32768", "455k".
    #[arg(short = 'c', default_value = "20MHz")]
    xtal: String,

    /// Maximum transport-layer payload, in bytes, per framed request.
    #[arg(short = 't', default_value_t = 256)]
    mtu: usize,

    /// Stop after this many cycles; zero or negative means unbounded.
    #[arg(short = 'l', default_value_t = 0)]
    max_cycles: i64,

    /// Device-CRC reads per blank-check and per program verify pass.
    #[arg(short = 'v', default_value_t = 100)]
    verify_repeat: u32,

    /// Mail address for status notifications, piped through sendmail.
    #[arg(short = 'm')]
    mail_to: Option<String>,

    /// Path at which to persist the cycle counter.
    #[arg(short = 's', default_value = "cycle")]
    state_file: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("ocd-endurance: {e}");
        std::process::exit(1);
    }
}

fn run() -> ocd::Result<()> {
    let cli = Cli::parse();

    let config = EnduranceConfig {
        serial_port: cli.port,
        baud: cli.baud.unwrap_or_else(default_baud),
        mtu: cli.mtu,
        xtal_hz: parse_xtal(&cli.xtal)?,
        max_cycles: cli.max_cycles,
        verify_repeat: cli.verify_repeat,
        mail_to: cli.mail_to,
        state_file: cli.state_file,
    };

    let cancel = CancelToken::new();
    install_sigint_handler(cancel.clone())?;

    tracing::info!(port = %config.serial_port, baud = config.baud, "connecting");
    let transport = connect(&config)?;
    let mut session = DebugSession::new(transport);
    session.set_sysclk_hz(config.xtal_hz);
    session.stop()?;

    let state = StateFile::open(&config.state_file)?;
    let mut supervisor = Supervisor::new(session, config, state, cancel);

    let cycle = supervisor.run()?;
    tracing::info!(cycle, "endurance run finished");
    Ok(())
}
