//! Session description model and msid dialect translation.

pub mod description;
pub mod mangle;

pub use description::{MediaSection, ParsedDescription, SdpError, SdpType, SessionDescription};
pub use mangle::{mangle, mangle_strict, replace_stream_id};
