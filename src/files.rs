// One steady-state file per run next to a directory holding one chrono file per setpoint, e.g.
//   1406191402i_SS_2000_NaCl_0.5p0.1_01.txt
//   1406191402i_CR_2000_NaCl_0.5p0.1_01/1406191402i_CR01_1.0mA_2000_NaCl_0.5p0.1_01.txt

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use log::{info, warn};

use crate::config::{RunMetadata, SourceMode};
use crate::error::{Error, Result};
use crate::experiment::{ChronoRow, Trace};

// Rows averaged at the end of each trace for the steady-state file
pub const STEADY_STATE_TAIL:usize = 2;

pub const COLUMN_TITLES:&str = "SMU Voltage (V)\tSMU Current(A)\tLocal Time (s)\tGlobal Time (s)";

#[derive(Debug, Clone, PartialEq)]
pub struct RunFiles {
	pub steady_state: PathBuf,
	pub chrono_dir: PathBuf,
	pub chrono: Vec<PathBuf>,
}

fn mode_tag(mode:SourceMode) -> (&'static str, f64, &'static str) {
	match mode {
		SourceMode::Current => ("i", 1000.0, "mA"),
		SourceMode::Voltage => ("v", 1.0, "V"),
	}
}

pub fn make_filenames(path:&[f64], run:&RunMetadata, stamp:&NaiveDateTime) -> RunFiles {
	let (tag, scale, unit) = mode_tag(run.source_mode);

	let front = format!("{}{}_", stamp.format("%y%m%d%H%M"), tag);
	let back  = format!("_{}_{}_{}p{}_{:02}", run.membrane_id, run.salt, py_float(run.high_concentration), py_float(run.low_concentration), run.run_number);

	let chrono_dir   = run.data_path.join(format!("{}CR{}", front, back));
	let steady_state = run.data_path.join(format!("{}SS{}.txt", front, back));

	let chrono = path.iter().enumerate()
		.map(|(idx, value)| chrono_dir.join(format!("{}CR{:02}_{}{}{}.txt", front, idx + 1, py_float(value * scale), unit, back)))
		.collect();

	RunFiles{ steady_state, chrono_dir, chrono }
}

pub fn ensure_dir(file:&Path) -> Result<()> {
	match file.parent() {
		Some(dir) if !dir.as_os_str().is_empty() => Ok(fs::create_dir_all(dir)?),
		_ => Ok(()),
	}
}

fn mean(xs:&[f64]) -> f64 {
	if xs.is_empty() { return f64::NAN; }
	xs.iter().sum::<f64>() / xs.len() as f64
}

fn median(xs:&[f64]) -> f64 {
	if xs.is_empty() { return f64::NAN; }
	let mut v = xs.to_vec();
	v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
	let mid = v.len() / 2;
	if v.len() % 2 == 0 { (v[mid - 1] + v[mid]) / 2.0 } else { v[mid] }
}

// Mean V and I, median times over the tail of each trace.  Empty traces give NaN
pub fn steady_state(traces:&[Trace]) -> Vec<ChronoRow> {
	traces.iter().map(|t| {
		let tail = &t[t.len().saturating_sub(STEADY_STATE_TAIL)..];
		let col = |f:fn(&ChronoRow) -> f64| -> Vec<f64> { tail.iter().map(f).collect() };
		ChronoRow {
			voltage:     mean(&col(|r| r.voltage)),
			current:     mean(&col(|r| r.current)),
			local_time:  median(&col(|r| r.local_time)),
			global_time: median(&col(|r| r.global_time)),
		}
	}).collect()
}

// Rust writes exponents as e-5 / e16, C and Python as e-05 / e+16
fn c_exponent(s:String) -> String {
	match s.split_once('e') {
		Some((mantissa, exp)) => {
			let exp:i32 = exp.parse().unwrap_or(0);
			format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
		},
		None => s,
	}
}

// %.18e
pub fn sci(x:f64) -> String {
	if x.is_nan() { return "nan".to_owned(); }
	if x.is_infinite() { return if x > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }; }
	c_exponent(format!("{:.18e}", x))
}

/// Shortest round-trip form that keeps the `.0` on whole numbers: `1.0`, `0.001`, `1e-05`
pub fn py_float(x:f64) -> String {
	if x.is_nan() { return "nan".to_owned(); }
	// Debug switches to exponent form below 1e-4 and from 1e16, like Python's repr
	c_exponent(format!("{:?}", x))
}

fn join_path(path:&[f64]) -> String {
	path.iter().map(|x| py_float(*x)).collect::<Vec<_>>().join(", ")
}

fn base_name(file:&Path) -> String {
	file.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

pub fn header(file:&Path, run:&RunMetadata, setpoint:Option<f64>, path:&[f64], stamp:&NaiveDateTime) -> String {
	let name = base_name(file);

	// Names start with yymmddHHMM, so the start time can be read back from them
	let time = match name.get(6..10) {
		Some(hhmm) if hhmm.chars().all(|c| c.is_ascii_digit()) => format!("{}:{}", &hhmm[..2], &hhmm[2..]),
		_ => stamp.format("%H:%M").to_string(),
	};

	let data_type = if setpoint.is_some() { "Chrono File" } else { "Steady State File" };
	let setpoint = setpoint.map(py_float).unwrap_or_else(|| "NA".to_owned());

	let lines:Vec<String> = vec![
		name,
		format!("Date\t{}", stamp.format("%m/%d/%Y")),
		format!("Time\t{}", time),
		format!("Data Type\t{}", data_type),
		format!("Source Mode\t{}", run.source_mode.name()),
		format!("Setpoint ({})\t{}", run.source_mode.unit(), setpoint),
		format!("Sweep Path\t{}", join_path(path)),
		format!("Run\t{:02}", run.run_number),
		format!("Membrane\t{}", run.membrane),
		format!("Membrane ID\t{}", run.membrane_id),
		format!("Salt\t{}", run.salt),
		format!("High Solution ID\t{}", run.high_solution_id),
		format!("High Concentration (M)\t{}", py_float(run.high_concentration)),
		format!("High Conductivity (mS/cm)\t{}", py_float(run.high_conductivity)),
		format!("High Solution T (C)\t{}", run.high_conc_t),
		format!("Low Solution ID\t{}", run.low_solution_id),
		format!("Low Concentration (M)\t{}", py_float(run.low_concentration)),
		format!("Low Conductivity (mS/cm)\t{}", py_float(run.low_conductivity)),
		format!("Low Solution T (C)\t{}", run.low_conc_t),
		format!("Lab Temperature (F)\t{}", run.lab_temp),
		COLUMN_TITLES.to_owned(),
	];

	lines.join("\n")
}

// A `None` setpoint marks the steady-state file
pub fn write_data(file:&Path, rows:&[ChronoRow], run:&RunMetadata, setpoint:Option<f64>, path:&[f64], stamp:&NaiveDateTime) -> Result<()> {
	ensure_dir(file)?;

	let mut w = BufWriter::new(File::create(file)?);
	writeln!(w, "{}", header(file, run, setpoint, path, stamp))?;
	for row in rows {
		let cols:Vec<String> = row.columns().iter().map(|x| sci(*x)).collect();
		writeln!(w, "{}", cols.join("\t"))?;
	}
	w.flush()?;
	Ok(())
}

pub fn record_data_files(traces:&[Trace], path:&[f64], run:&RunMetadata) -> Result<RunFiles> {
	record_data_files_at(traces, path, run, &Local::now().naive_local())
}

pub fn record_data_files_at(traces:&[Trace], path:&[f64], run:&RunMetadata, stamp:&NaiveDateTime) -> Result<RunFiles> {
	if traces.len() != path.len() {
		return Err(Error::Parameter(format!("{} traces for a sweep path of {} setpoints", traces.len(), path.len())));
	}

	let files = make_filenames(path, run, stamp);

	if traces.iter().any(|t| t.is_empty()) {
		warn!("Some traces are empty, their steady-state rows will be NaN");
	}
	write_data(&files.steady_state, &steady_state(traces), run, None, path, stamp)?;
	info!("wrote {}", files.steady_state.display());

	for ((file, trace), setpoint) in files.chrono.iter().zip(traces).zip(path) {
		write_data(file, trace, run, Some(*setpoint), path, stamp)?;
	}
	info!("wrote {} chrono files to {}", files.chrono.len(), files.chrono_dir.display());

	Ok(files)
}
