//! srtp-rekey - SRTP/SRTCP master key lifecycle and index-scheduled key
//! rotation.
//!
//! [`srtp`] is the engine: master keys, per-stream key timelines, replay
//! protection and packet protection. [`interop`] adds the out-of-band
//! broadcast protocol two peers use to agree on when a key changes.

pub mod config;
pub mod interop;
pub mod media;
pub mod srtp;
