//! Wire protocol for the kiosk controller.
//!
//! This module contains:
//! - Frame extraction from the inbound byte stream
//! - Outbound command encoding and classification

pub mod command;
pub mod frame;

pub use command::CommandKind;
pub use frame::{FRAME_END, FRAME_START, FrameDecoder, Frames, MAX_FRAME_SIZE};
