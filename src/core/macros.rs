//! Core Macros
//!
//! Byte-level helpers shared by the payload decoders.

/// Checks if a specific bit is set in a byte.
#[macro_export]
macro_rules! is_bit_set {
    ($byte:expr, $pos:expr) => {
        ($byte & (1 << $pos)) != 0
    };
}

/// Extracts a `u16` value in little-endian format from a byte slice.
#[macro_export]
macro_rules! get_u16_little_endian {
    ($slice:expr, $lsb:expr) => {
        (($slice[1 + $lsb] as u16) << 8) | $slice[$lsb] as u16
    };
}
