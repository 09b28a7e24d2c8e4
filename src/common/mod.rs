//! Shared helper types.
mod bytestr;

pub use bytestr::ByteStr;
