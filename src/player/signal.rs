use std::fmt;

use uuid::Uuid;

/// Control events delivered to a guild's playback job.
///
/// They travel over a zero-capacity channel, so a send returns only once
/// the job has taken the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Skip the track with this id. Ignored once another track plays.
    Skip(Uuid),
    Stop,
    Pause,
    Unpause,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(id) => write!(f, "skip {}", id),
            Self::Stop => f.write_str("stop"),
            Self::Pause => f.write_str("pause"),
            Self::Unpause => f.write_str("unpause"),
        }
    }
}
