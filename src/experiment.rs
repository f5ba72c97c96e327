
use std::thread;
use std::time::Instant;

use log::{info, warn};
use serde::{Serialize, Deserialize};

use crate::config::{self, RunMetadata};
use crate::devices::k2400::{Reading, SourceMeter};
use crate::error::{protocol, Result};
use crate::files::{self, RunFiles};
use crate::instrument::Instrument;

// Preallocation used when there's no point delay to estimate the trace length from
const UNPACED_CAPACITY:usize = 1024;

// Times are taken on the host, the SMU clock restarts with every trigger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChronoRow {
	pub voltage: f64,
	pub current: f64,
	pub local_time: f64,
	pub global_time: f64,
}

impl ChronoRow {
	pub fn columns(&self) -> [f64; 4] { [self.voltage, self.current, self.local_time, self.global_time] }
}

pub type Trace = Vec<ChronoRow>;

// `None` keeps what the instrument params say
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChronoOptions {
	pub experiment_length: Option<f64>,
	pub point_delay: Option<f64>,
}

// Runs `f` and switches the output off afterwards whether or not it worked
fn with_output_off<T: Instrument, R, F>(smu:&mut SourceMeter<T>, f:F) -> Result<R>
	where F: FnOnce(&mut SourceMeter<T>) -> Result<R>
{
	let res = f(smu);
	let off = smu.source_on(false);
	match (res, off) {
		(Ok(r), Ok(()))  => Ok(r),
		(Ok(_), Err(e))  => Err(e),
		(Err(e), Ok(())) => Err(e),
		(Err(e), Err(off_err)) => {
			warn!("Unable to switch the output off after a failed sweep: {}", off_err);
			Err(e)
		},
	}
}

/// Runs the trigger model once per setpoint.  `result[n]` holds the readings taken at `path[n]`.
pub fn simple_sweep<T: Instrument>(smu:&mut SourceMeter<T>, path:&[f64]) -> Result<Vec<Vec<Reading>>> {
	let first = match path.first() {
		Some(x) => *x,
		None => return Ok(vec![]),
	};

	smu.setup_simple_experiment(first)?;
	with_output_off(smu, |smu| {
		let mut data = Vec::with_capacity(path.len());
		for (idx, setpoint) in path.iter().enumerate() {
			smu.set_output(*setpoint)?;
			let readings = smu.take_points()?;
			info!("setpoint {}/{} ({} {}): {} readings", idx + 1, path.len(), setpoint, smu.source_mode().unit(), readings.len());
			data.push(readings);
		}
		Ok(data)
	})
}

fn expected_rows(length:f64, delay:f64, max_points:usize) -> usize {
	let est = if delay > 0.0 { (length / delay).ceil() as usize + 1 } else { UNPACED_CAPACITY };
	est.min(max_points)
}

/// Chronopotentiometry (or chronoamperometry in voltage mode) one reading at
/// a time.  Slower than `simple_sweep` but not bound by the 2500 point trace
/// buffer: each setpoint is held for `experiment_length` seconds with
/// `point_delay` seconds of sleep after every reading.
pub fn slow_chrono<T: Instrument>(smu:&mut SourceMeter<T>, path:&[f64], opts:&ChronoOptions) -> Result<Vec<Trace>> {
	if let Some(length) = opts.experiment_length { smu.params.experiment_length = length; }
	if let Some(delay)  = opts.point_delay       { smu.params.point_delay = delay; }

	// Every trigger must produce exactly one reading
	smu.params.trigger_count = 1;

	let first = match path.first() {
		Some(x) => *x,
		None => return Ok(vec![]),
	};
	smu.setup_simple_experiment(first)?;
	let global_start = Instant::now();

	with_output_off(smu, |smu| {
		let mut data = Vec::with_capacity(path.len());
		for (idx, setpoint) in path.iter().enumerate() {
			let trace = chrono_trace(smu, *setpoint, global_start)?;
			info!("setpoint {}/{} ({} {}): {} readings", idx + 1, path.len(), setpoint, smu.source_mode().unit(), trace.len());
			data.push(trace);
		}
		Ok(data)
	})
}

fn chrono_trace<T: Instrument>(smu:&mut SourceMeter<T>, setpoint:f64, global_start:Instant) -> Result<Trace> {
	let length = config::seconds(smu.params.experiment_length, "experiment length")?;
	let delay  = config::seconds(smu.params.point_delay, "point delay")?;
	let max_points = smu.params.max_points;

	let mut trace:Trace = Vec::with_capacity(expected_rows(smu.params.experiment_length, smu.params.point_delay, max_points));

	let start = Instant::now();
	smu.set_output(setpoint)?;

	loop {
		let now = Instant::now();
		let local = now.duration_since(start);
		if local >= length { break; }

		if trace.len() >= max_points {
			warn!("Chrono trace at {} reached {} points, stopping early", setpoint, max_points);
			break;
		}

		let local_time  = local.as_secs_f64();
		let global_time = now.duration_since(global_start).as_secs_f64();

		let reading = smu.take_points()?.into_iter().next()
			.ok_or_else(|| protocol("Source meter returned an empty trace for a single trigger"))?;

		trace.push(ChronoRow{ voltage: reading.voltage, current: reading.current, local_time, global_time });
		thread::sleep(delay);
	}

	trace.shrink_to_fit();
	Ok(trace)
}

pub fn slow_chrono_recorded<T: Instrument>(smu:&mut SourceMeter<T>, path:&[f64], opts:&ChronoOptions, run:&mut RunMetadata) -> Result<(Vec<Trace>, RunFiles)> {
	run.source_mode = smu.source_mode();
	let traces = slow_chrono(smu, path, opts)?;
	let written = files::record_data_files(&traces, path, run)?;
	Ok((traces, written))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preallocation_is_capped() {
		assert_eq!(expected_rows(1.0, 0.25, 1_000_000), 5);
		assert_eq!(expected_rows(1e6, 0.01, 1_000_000), 1_000_000);
		assert_eq!(expected_rows(5.0, 0.0, 100), 100);
		assert_eq!(expected_rows(5.0, 0.0, 1_000_000), UNPACED_CAPACITY);
	}

	#[test]
	fn row_columns_order() {
		let r = ChronoRow{ voltage: 1.0, current: 2.0, local_time: 3.0, global_time: 4.0 };
		assert_eq!(r.columns(), [1.0, 2.0, 3.0, 4.0]);
	}
}
