
// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments, either directly or through a LAN/GPIB gateway
pub mod vxi11;

// The transport seam between device drivers and the link they talk over
pub mod instrument;

// Drivers for specific instruments
pub mod devices;

// Sweeps and chrono acquisition on a source meter
pub mod experiment;

// Data file naming, headers and steady-state summaries
pub mod files;

pub mod config;
pub mod error;

pub use error::{Error, Result};
