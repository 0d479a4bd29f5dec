pub mod guild;
pub mod manager;
pub mod messenger;
pub mod playback;
pub mod signal;
pub mod track;

pub use guild::{GuildPlayer, Removed};
pub use manager::PlayerManager;
pub use messenger::{LogMessenger, Messenger, Notification, NotificationKind, Notifier, WebhookMessenger};
pub use playback::{JobEnd, PlaybackContext, PlaybackJob, SessionOpener};
pub use signal::Interrupt;
pub use track::{Track, TrackData, TrackState};
