//! 핸들러 모듈

pub mod chat;
pub mod connection;
pub mod party;
pub mod playback;

pub use chat::*;
pub use connection::*;
pub use party::*;
pub use playback::*;
