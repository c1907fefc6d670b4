//! Interface to the external peer-media-session capability.
//!
//! The coordinator never touches audio or video itself. It asks a
//! [`MediaSessionFactory`] for a session, waits for [`MediaEvent::ReadyToCall`]
//! and then joins the room both participants derived.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Configuration handed to the media collaborator when a session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    /// Element the local media source renders into.
    pub local_video_el: String,
    /// Element remote media sinks are attached to.
    pub remote_videos_el: String,
    /// Acquire camera/microphone as soon as the session is created.
    pub auto_request_media: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            local_video_el: "local".to_string(),
            remote_videos_el: "remotes".to_string(),
            auto_request_media: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// Local media is acquired and the session may join a room.
    ReadyToCall,
    /// The direct connection is gone. Terminal for the session.
    Disconnected,
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn join_room(&self, room: &str) -> Result<(), anyhow::Error>;

    async fn disconnect(&self);
}

#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    /// Creates a new media session and returns it, along with its events.
    async fn create_session(
        &self,
        config: &MediaConfig,
    ) -> Result<(Arc<dyn MediaSession>, mpsc::Receiver<MediaEvent>), anyhow::Error>;
}
