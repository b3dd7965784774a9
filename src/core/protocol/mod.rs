// src/core/protocol/mod.rs

pub mod reply;
pub mod resp_frame;
pub use reply::into_payload;
pub use resp_frame::{RespFrame, RespFrameCodec};
