//! ffmpeg-backed transcoding of arbitrary audio into Opus frames.

pub mod demux;
pub mod options;
pub mod session;

pub use demux::OggOpusDemuxer;
pub use options::{EncodeMode, EncodeOptions, FrameDuration};
pub use session::{InputStream, TranscodeSession};
