mod channel;

pub use channel::*;
