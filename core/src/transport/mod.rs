pub mod frame;
pub mod sender;

pub use frame::{FrameReader, FrameWriter, MAX_FRAME_BYTES};
pub use sender::VolumeSender;
