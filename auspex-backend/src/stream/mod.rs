//! Client for the upstream event stream.

mod client;
mod frame;

pub use client::{ConnectionState, StreamClient, StreamError, StreamSettings};
pub use frame::{Frame, FrameError, RecentEvents, SubscribeCommand, decode_frame};
