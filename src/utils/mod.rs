pub mod ringchannel;
pub mod time;
