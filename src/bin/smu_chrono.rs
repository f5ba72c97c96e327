//! Command-line front end for chrono runs on a Keithley 2400 source meter.
//!
//! ```bash
//! smu_chrono --resource TCPIP0::192.168.1.5::gpib0,25::INSTR identify
//! smu_chrono --config run.toml chrono --setpoints 0.001,0.002,0.005 --length 600 --delay 1
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};

use smu_chrono::config::RunConfig;
use smu_chrono::devices::k2400::SourceMeter;
use smu_chrono::experiment::{self, ChronoOptions};
use smu_chrono::instrument::Resource;
use smu_chrono::vxi11::{ClientOptions, CoreClient};

#[derive(Parser)]
#[command(name = "smu_chrono")]
#[command(about = "Chronopotentiometric sweeps on a 2400-series source meter", long_about = None)]
struct Cli {
	/// TOML file with [instrument] and [run] tables
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Instrument address, e.g. TCPIP0::10.0.0.7::gpib0,25::INSTR or GPIB0::25
	#[arg(long, global = true)]
	resource: Option<String>,

	/// LAN/GPIB gateway host for GPIB addresses
	#[arg(long, global = true)]
	gateway: Option<String>,

	/// Directory data files are written to
	#[arg(long, global = true)]
	data_path: Option<PathBuf>,

	/// Run number used in file names and headers
	#[arg(long, global = true)]
	run: Option<u32>,

	/// More output (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	verbose: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Print the instrument identity as JSON
	Identify,

	/// Run the trigger model once per setpoint
	Sweep {
		/// Comma-separated setpoints in A (current mode) or V (voltage mode)
		#[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
		setpoints: Vec<f64>,
	},

	/// Hold each setpoint for a fixed time, reading at a fixed interval
	Chrono {
		#[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
		setpoints: Vec<f64>,

		/// Seconds per setpoint
		#[arg(long)]
		length: Option<f64>,

		/// Seconds between readings
		#[arg(long)]
		delay: Option<f64>,

		/// Keep the data in memory only
		#[arg(long)]
		no_record: bool,
	},
}

fn init_logging(verbose:u8) {
	let level = match verbose {
		0 => LevelFilter::Info,
		1 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};
	env_logger::Builder::new()
		.filter_level(level)
		.parse_default_env()
		.init();
}

fn load_config(cli:&Cli) -> Result<RunConfig> {
	let mut cfg = match &cli.config {
		Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => RunConfig::default(),
	};

	if let Some(r) = &cli.resource  { cfg.resource = r.clone(); }
	if let Some(g) = &cli.gateway   { cfg.gateway = Some(g.clone()); }
	if let Some(p) = &cli.data_path { cfg.run.data_path = p.clone(); }
	if let Some(n) = cli.run        { cfg.run.run_number = n; }

	cfg.validate()?;
	Ok(cfg)
}

fn connect(cfg:&RunConfig) -> Result<SourceMeter<CoreClient>> {
	let res = Resource::parse(&cfg.resource, cfg.gateway.as_deref())?;
	info!("connecting to {}", res);

	let opts = ClientOptions{ io_timeout_ms: cfg.io_timeout_ms, ..ClientOptions::default() };
	let core = CoreClient::connect(&res.host, &res.device, opts)
		.with_context(|| format!("opening a VXI-11 link to {}", res))?;

	Ok(SourceMeter::with_params(core, cfg.instrument.clone())?)
}

fn run(cli:&Cli, cfg:&mut RunConfig, smu:&mut SourceMeter<CoreClient>) -> Result<()> {
	match &cli.command {
		Commands::Identify => {
			let idn = smu.identify()?;
			println!("{}", serde_json::to_string_pretty(&idn)?);
		},

		Commands::Sweep{ setpoints } => {
			let data = experiment::simple_sweep(smu, setpoints)?;
			for (setpoint, readings) in setpoints.iter().zip(&data) {
				match readings.last() {
					Some(r) => println!("{}\t{} readings\tlast: {} V\t{} A", setpoint, readings.len(), r.voltage, r.current),
					None    => println!("{}\tno readings", setpoint),
				}
			}
		},

		Commands::Chrono{ setpoints, length, delay, no_record } => {
			let opts = ChronoOptions{ experiment_length: *length, point_delay: *delay };
			if *no_record {
				let traces = experiment::slow_chrono(smu, setpoints, &opts)?;
				for (setpoint, trace) in setpoints.iter().zip(&traces) {
					println!("{}\t{} readings", setpoint, trace.len());
				}
			} else {
				let (_, files) = experiment::slow_chrono_recorded(smu, setpoints, &opts, &mut cfg.run)?;
				println!("{}", files.steady_state.display());
				for f in &files.chrono {
					println!("{}", f.display());
				}
			}
		},
	}

	Ok(())
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	let mut cfg = load_config(&cli)?;
	let mut smu = connect(&cfg)?;

	let res = run(&cli, &mut cfg, &mut smu);

	// Leave the instrument idle whatever happened
	if let Err(e) = smu.reset_device() {
		warn!("Unable to reset the source meter: {}", e);
	}

	res
}
