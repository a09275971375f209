mod message;
mod primitives;

pub use message::*;
pub use primitives::*;
