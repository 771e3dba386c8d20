//! flowtap capture program support
//!
//! This crate provides:
//! - Fixed-layout event record codec
//! - Capture program capability trait and a scripted mock
//! - libbpf-backed capture program (`bpf` feature)

pub mod capture;
pub mod codec;

#[cfg(feature = "bpf")]
pub mod bpf_capture;

pub use capture::{AttachError, CaptureError, CaptureProgram, MockCapture};
pub use codec::{decode, encode, DecodeError, RECORD_SIZE};

#[cfg(feature = "bpf")]
pub use bpf_capture::{BpfCapture, COUNTS_MAP, EVENTS_MAP};
