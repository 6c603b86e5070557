//! Audio device streams, frame type, ring buffers, and process-wide status.

pub mod capture;
pub mod frame;
pub mod ring_buffer;
pub mod state;

pub use capture::{list_devices, start_mic_capture, start_reference_capture, CaptureHandle};
pub use frame::Frame;
pub use ring_buffer::{frame_ring, FrameConsumer, FrameProducer};
pub use state::{ServerState, Status};
