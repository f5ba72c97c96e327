mod common;

use std::time::Duration;

use common::FakeSmu;
use smu_chrono::config::{InstrumentParams, SourceMode, Terminal};
use smu_chrono::devices::k2400::{SourceMeter, SrqConfig};
use smu_chrono::error::Error;

fn smu() -> SourceMeter<FakeSmu> {
	let mut smu = SourceMeter::new(FakeSmu::new()).unwrap();
	smu.set_srq_poll(Duration::from_millis(1));
	smu
}

#[test]
fn connection_setup_runs_before_srq_setup() {
	let mut smu = smu();
	let fake = smu.instrument();

	assert_eq!(fake.log[0], "*IDN?");
	assert_eq!(fake.log[1], ":*RST");
	assert!(fake.written(":FORM:DATA SRE"));
	assert!(fake.written(":FORM:ELEM:SENS VOLT,CURR,TIME"));
	assert!(fake.written(":SENS:FUNC:ON \"VOLT\",\"CURR\""));

	let beep = fake.position(":SYST:BEEP:STAT OFF").unwrap();
	let sreg = fake.position(":FORM:SREG BIN").unwrap();
	assert!(beep < sreg);

	assert!(fake.written(":*SRE 33"));
	assert!(fake.written(":STAT:MEAS:ENAB 512"));
	assert!(fake.written(":*ESE 1"));
	assert_eq!(fake.log.last().map(|s| s.as_str()), Some(":*CLS"));
}

#[test]
fn other_models_are_rejected() {
	let res = SourceMeter::new(FakeSmu::with_idn("Siglent Technologies,SPD3303X,SPD3X,1.01"));
	assert!(matches!(res, Err(Error::Protocol(_))));
}

#[test]
fn identity_is_parsed() {
	let mut smu = smu();
	let idn = smu.identify().unwrap();
	assert_eq!(idn.manufacturer, "KEITHLEY INSTRUMENTS INC.");
	assert_eq!(idn.model, "MODEL 2400");
	assert_eq!(idn.serial_num, "1234567");
	assert_eq!(idn.fw_version, "C30");
}

#[test]
fn custom_srq_registers() {
	let mut smu = smu();
	smu.initialize_srq(SrqConfig{ compliance: true, event_srq: false, ..SrqConfig::default() }).unwrap();

	let fake = smu.instrument();
	assert!(fake.written(":*SRE 1"));
	assert!(fake.written(":STAT:MEAS:ENAB 16896"));
}

#[test]
fn register_query() {
	let mut smu = smu();
	assert_eq!(smu.query_register("*ESE?").unwrap(), 1);
}

#[test]
fn voltage_source_configuration() {
	let mut smu = smu();
	smu.params = InstrumentParams{
		source_mode: SourceMode::Voltage,
		compliance_level: 0.1,
		nplc: 0.5,
		terminal: Terminal::Rear,
		four_terminal: true,
		..InstrumentParams::default()
	};
	smu.configure_source().unwrap();
	smu.set_output(1.25).unwrap();

	let fake = smu.instrument();
	assert!(fake.written(":SOUR:FUNC:MODE VOLT"));
	assert!(fake.written(":SENS:CURR:PROT:LEV 0.1"));
	assert!(fake.written(":SENS:CURR:NPLC 0.5"));
	assert!(fake.written(":ROUT:TERM REAR"));
	assert!(fake.written(":SYST:RSEN ON"));
	assert!(fake.written(":SOUR:VOLT:LEV:TRIG 1.25"));
}

#[test]
fn bad_params_write_nothing() {
	let mut smu = smu();
	smu.params.compliance_level = 500.0;
	let before = smu.instrument().log.len();

	assert!(matches!(smu.configure_source(), Err(Error::Parameter(_))));
	assert_eq!(smu.instrument().log.len(), before);
}

#[test]
fn buffer_and_trigger_setup() {
	let mut smu = smu();
	smu.params.buffer_size = 100;
	smu.params.trigger_count = 10;
	smu.params.source_delay = 0.05;
	smu.reset_buffer().unwrap();
	smu.configure_chrono_trigger().unwrap();

	let fake = smu.instrument();
	let n = fake.log.len();
	assert_eq!(&fake.log[n - 7..], &[
		":TRAC:FEED:CONT NEV", ":TRAC:CLE", ":TRAC:POIN 100", ":TRAC:FEED:CONT NEXT",
		":TRIG:COUN 10", ":TRIG:DEL 0", ":SOUR:DEL 0.05",
	]);
}

#[test]
fn take_points_waits_for_srq_then_reads_the_trace() {
	let mut smu = smu();
	smu.params.trigger_count = 3;
	smu.setup_simple_experiment(0.002).unwrap();

	let readings = smu.take_points().unwrap();
	assert_eq!(readings.len(), 3);
	assert!((readings[0].current - 0.002).abs() < 1e-9);
	assert!((readings[0].voltage - 2.0).abs() < 1e-6);
	assert!(readings[2].time > readings[1].time);

	let fake = smu.instrument();
	let init = fake.last_position(":INIT").unwrap();
	assert_eq!(fake.log[init + 1], "*OPC");
	assert_eq!(fake.log[init + 2], ":TRAC:DATA?");
}

#[test]
fn missing_srq_times_out() {
	let mut fake = FakeSmu::new();
	fake.never_srq = true;
	let mut smu = SourceMeter::new(fake).unwrap();
	smu.set_srq_poll(Duration::from_millis(1));
	smu.params.srq_timeout = Some(0.02);

	assert!(matches!(smu.take_points(), Err(Error::Timeout(_))));
}

#[test]
fn unrepresentable_srq_timeout_is_an_error() {
	let mut smu = smu();
	let before = smu.instrument().log.len();

	smu.params.srq_timeout = Some(f64::INFINITY);
	assert!(matches!(smu.take_points(), Err(Error::Parameter(_))));

	smu.params.srq_timeout = Some(1e20);
	assert!(matches!(smu.take_points(), Err(Error::Parameter(_))));

	// Rejected before the trigger model was started
	assert_eq!(smu.instrument().log.len(), before);
}

#[test]
fn reset_device_disables_service_requests() {
	let mut smu = smu();
	smu.reset_device().unwrap();

	let fake = smu.into_inner();
	let n = fake.log.len();
	assert_eq!(&fake.log[n - 3..], &[":*RST", ":*CLS", ":*SRE 0"]);
}
