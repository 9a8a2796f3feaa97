pub mod decoder; // byte stream -> blocks
pub mod device; // serial port session
pub mod frame; // blocks -> typed frames

pub use decoder::FrameDecoder;
pub use device::{DeviceSession, SessionState};
pub use frame::{Block, Command, RavenFrame};
