//! Fundamental types shared across the whole machine.
//!
//! Aurelia is a strict 64-bit architecture: addresses, data words and
//! general-purpose registers are all 64 bits wide. Instructions are a fixed
//! 32 bits. The aliases here exist for semantic clarity at interfaces, not
//! for abstraction.

pub mod bits;
pub mod clock;

pub use bits::BitOps;
pub use clock::Clock;

/// A physical address on the system bus. Flat 64-bit address space.
pub type Address = u64;

/// A unit of data transferred across the bus (one machine word).
pub type Data = u64;

/// A machine word (alias of [`Data`] for register-file contexts).
pub type Word = u64;

/// Width of a machine word in bytes.
pub const WORD_SIZE: usize = 8;
