
#[macro_use]
extern crate lazy_static;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like oscilloscopes, power supplies, waveform generators, etc
pub mod vxi11;

// Message channels to an instrument: VXI-11 over LAN or an in-process simulated scope
pub mod transport;

// SCPI drivers: oscilloscope acquisition session and signal generator
pub mod devices;

pub mod config;
pub mod error;
pub mod render;
pub mod synthetic;

pub use crate::error::{Error, Result};
