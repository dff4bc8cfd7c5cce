//! Data channel payload handling
//!
//! Frames oversized application messages and reassembles them on receipt.

pub mod framer;

pub use framer::{frame_records, FrameRecord, MessageFramer, Reassembly};
