//! Small value types shared across the crate.

mod byte_buf;
mod share_rate;

pub use byte_buf::ByteBuf;
pub use share_rate::ShareRate;
