//! Shared protocol definitions for the fixwatch wire format.

pub mod entry;
pub mod fix;
pub mod stream;
