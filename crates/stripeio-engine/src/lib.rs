//! Stripeio Engine - RAID layout and I/O fan-out
//!
//! The engine turns a logical byte sequence into per-stripe block sets
//! according to the configured RAID level, fans the block puts out to the
//! drivers the scheduler picked, and reassembles the original bytes on
//! read, reconstructing lost blocks where the level permits (parity XOR
//! for RAID 5, mirror siblings for RAID 1 and 10).

mod engine;
mod layout;

pub use engine::RaidEngine;
