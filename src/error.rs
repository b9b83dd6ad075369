use serenity::model::id::ChannelId;
use thiserror::Error;

/// Everything a music command can fail with. The `Display` text is shown to
/// the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MusicError {
    #[error("There is already an active session in this server. Multiple sessions in different channels are not supported.")]
    Conflict,

    #[error("You are not connected to a voice channel.")]
    UserNotInVoice,

    #[error("The bot is not connected to a voice channel.")]
    NotConnected,

    #[error("There is no audio currently playing.")]
    NothingPlaying,

    #[error("The music is not paused.")]
    NotPaused,

    #[error("There are no more songs in the queue.")]
    NoMoreSongs,

    #[error("The queue is currently empty.")]
    QueueEmpty,

    #[error("No other songs in queue. Use 'stop' to clear the currently playing song.")]
    NothingElseQueued,

    #[error("I'm already in <#{0}>")]
    AlreadyInChannel(ChannelId),

    #[error("No results found for `{0}`.")]
    Resolution(String),

    #[error("Invalid selection. Run `search` first and pick a number from the list.")]
    InvalidSelection,

    #[error("The queue was out of sync and has been cleared.")]
    InternalInconsistency,

    #[error("Could not start playback: {0}")]
    Player(String),
}

pub type MusicResult<T> = Result<T, MusicError>;

impl MusicError {
    /// Reaction added to the command message when this error is reported.
    pub fn reaction(&self) -> &'static str {
        match self {
            MusicError::Conflict => "😵",
            MusicError::UserNotInVoice | MusicError::Resolution(_) | MusicError::InvalidSelection => "❌",
            MusicError::NotConnected => "🙅",
            MusicError::NothingPlaying => "🤔",
            MusicError::NotPaused => "❓",
            MusicError::NoMoreSongs => "🤷",
            MusicError::QueueEmpty | MusicError::NothingElseQueued => "✅",
            MusicError::AlreadyInChannel(_) => "🤔",
            MusicError::InternalInconsistency | MusicError::Player(_) => "💀",
        }
    }
}

impl From<songbird::input::error::Error> for MusicError {
    fn from(e: songbird::input::error::Error) -> MusicError {
        MusicError::Player(e.to_string())
    }
}

impl From<songbird::error::JoinError> for MusicError {
    fn from(e: songbird::error::JoinError) -> MusicError {
        MusicError::Player(e.to_string())
    }
}

impl From<songbird::tracks::TrackError> for MusicError {
    fn from(e: songbird::tracks::TrackError) -> MusicError {
        MusicError::Player(e.to_string())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Expected a DISCORD_TOKEN in the environment")]
    MissingToken,

    #[error("Invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_messages() {
        assert_eq!(
            MusicError::AlreadyInChannel(ChannelId(42)).to_string(),
            "I'm already in <#42>"
        );
        assert_eq!(
            MusicError::Resolution("lofi".to_string()).to_string(),
            "No results found for `lofi`."
        );
        assert_eq!(MusicError::NoMoreSongs.reaction(), "🤷");
    }
}
