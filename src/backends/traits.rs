use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::devices::LocalAddress;
use crate::error::BackendError;
use crate::model::{AllowedAction, DeviceRef, ItemRef, RepeatMode, TrackOrEpisode};

pub type BackendResult<T> = Result<T, BackendError>;

// =============================================================================
// Cloud backend
// =============================================================================

/// Raw playback state as reported by the cloud API.
///
/// `shuffle` and `repeat` are optional because the API omits them for some
/// device types; the resolver backfills them from local telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudPlaybackState {
    pub is_playing: bool,
    pub shuffle: Option<bool>,
    pub repeat: Option<RepeatMode>,
    pub progress_ms: Option<u64>,
    pub item: Option<TrackOrEpisode>,
    pub context_uri: Option<String>,
    pub device: Option<DeviceRef>,
    pub disallowed_actions: BTreeSet<AllowedAction>,
}

/// The cloud play queue: what is playing plus what comes next.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueInfo {
    pub currently_playing: Option<ItemRef>,
    pub queue: Vec<ItemRef>,
}

/// Typed client for the streaming vendor's control API.
///
/// Every device-scoped call takes an optional device id; `None` targets
/// whichever device the cloud currently considers active.
#[async_trait]
pub trait CloudBackend: Send + Sync + 'static {
    /// Current playback state, `None` when nothing is active.
    async fn get_playback_state(&self) -> BackendResult<Option<CloudPlaybackState>>;

    async fn resume(&self, device_id: Option<&str>) -> BackendResult<()>;
    async fn pause(&self, device_id: Option<&str>) -> BackendResult<()>;
    async fn skip_next(&self, device_id: Option<&str>) -> BackendResult<()>;
    async fn skip_previous(&self, device_id: Option<&str>) -> BackendResult<()>;
    async fn seek(&self, position_ms: u64, device_id: Option<&str>) -> BackendResult<()>;
    async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> BackendResult<()>;
    async fn set_shuffle(&self, enabled: bool, device_id: Option<&str>) -> BackendResult<()>;
    async fn set_repeat(&self, mode: RepeatMode, device_id: Option<&str>) -> BackendResult<()>;

    /// Start a context (album/playlist/show/artist) at `offset`.
    async fn play_context(
        &self,
        context_uri: &str,
        offset: usize,
        position_ms: Option<u64>,
        device_id: Option<&str>,
    ) -> BackendResult<()>;

    /// Start an explicit list of track/episode URIs at `offset`.
    async fn play_items(
        &self,
        uris: &[String],
        offset: usize,
        position_ms: Option<u64>,
        device_id: Option<&str>,
    ) -> BackendResult<()>;

    async fn add_to_queue(&self, uri: &str, device_id: Option<&str>) -> BackendResult<()>;

    async fn transfer_playback(&self, device_id: &str, play: bool) -> BackendResult<()>;

    /// Devices visible to the account; `refresh` bypasses the client's own cache.
    async fn get_devices(&self, refresh: bool) -> BackendResult<Vec<DeviceRef>>;

    async fn get_queue(&self) -> BackendResult<QueueInfo>;

    async fn get_track(&self, id: &str) -> BackendResult<TrackOrEpisode>;
    async fn get_episode(&self, id: &str) -> BackendResult<TrackOrEpisode>;
    async fn get_artist_albums(&self, artist_id: &str) -> BackendResult<Vec<ItemRef>>;
}

// =============================================================================
// Local-protocol backend
// =============================================================================

/// Coarse transport state of a local speaker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Playing,
    Paused,
    #[default]
    Stopped,
    Transitioning,
    NoMedia,
}

impl TransportState {
    /// Map a UPnP AVTransport `CurrentTransportState` value.
    pub fn from_upnp(value: &str) -> Self {
        match value {
            "PLAYING" => Self::Playing,
            "PAUSED_PLAYBACK" => Self::Paused,
            "TRANSITIONING" => Self::Transitioning,
            "NO_MEDIA_PRESENT" => Self::NoMedia,
            _ => Self::Stopped,
        }
    }

    /// Transitioning counts as playing; the speaker is on its way there.
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing | Self::Transitioning)
    }
}

/// Shuffle/repeat as the local speaker reports them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayMode {
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

impl PlayMode {
    /// Map a `CurrentPlayMode` value (`NORMAL`, `SHUFFLE_NOREPEAT`, ...).
    pub fn from_upnp(value: &str) -> Option<Self> {
        let (shuffle, repeat) = match value {
            "NORMAL" => (false, RepeatMode::Off),
            "REPEAT_ALL" => (false, RepeatMode::All),
            "REPEAT_ONE" => (false, RepeatMode::One),
            "SHUFFLE_NOREPEAT" => (true, RepeatMode::Off),
            "SHUFFLE" => (true, RepeatMode::All),
            "SHUFFLE_REPEAT_ONE" => (true, RepeatMode::One),
            _ => return None,
        };
        Some(Self { shuffle, repeat })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportInfo {
    pub state: TransportState,
    /// Raw transport status (`OK`, `ERROR_OCCURRED`, ...)
    pub status: String,
    pub play_mode: Option<PlayMode>,
}

/// Now-playing metadata from a local speaker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalTrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// `h:mm:ss`
    pub duration: Option<String>,
    /// `h:mm:ss`
    pub position: Option<String>,
    /// Absolute URL or a path relative to the speaker
    pub artwork_url: Option<String>,
    /// Transport URI; embeds the catalog URI for cloud content
    pub uri: Option<String>,
    /// Raw DIDL-Lite document
    pub embedded_metadata: Option<String>,
}

/// Audio source a local speaker is currently pointed at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MusicSource {
    /// The streaming account's own integration
    CloudIntegration,
    /// Line-in, TV, radio, local library, ...
    Other(String),
    None,
}

/// Control handle for one local-protocol speaker.
#[async_trait]
pub trait LocalProtocolBackend: Send + Sync {
    async fn play(&self) -> BackendResult<()>;
    async fn pause(&self) -> BackendResult<()>;
    async fn next(&self) -> BackendResult<()>;
    async fn previous(&self) -> BackendResult<()>;
    /// Seek to an `h:mm:ss` position in the current track.
    async fn seek(&self, position: &str) -> BackendResult<()>;

    async fn get_volume(&self) -> BackendResult<u8>;
    async fn set_volume(&self, percent: u8) -> BackendResult<()>;

    async fn get_transport_info(&self) -> BackendResult<TransportInfo>;
    async fn get_track_info(&self) -> BackendResult<LocalTrackInfo>;

    async fn clear_queue(&self) -> BackendResult<()>;
    /// Append a URI; returns the 0-based queue position it landed at.
    async fn enqueue_by_uri(&self, uri: &str) -> BackendResult<usize>;
    async fn play_from_queue(&self, index: usize) -> BackendResult<()>;

    async fn get_music_source(&self) -> BackendResult<MusicSource>;
    /// Point the speaker at the cloud integration. `Unsupported` when the
    /// firmware or current state cannot do it at all.
    async fn activate_source(&self) -> BackendResult<()>;
}

/// Opens local-protocol handles by network address.
#[async_trait]
pub trait LocalConnector: Send + Sync + 'static {
    async fn connect(&self, address: &LocalAddress) -> BackendResult<Arc<dyn LocalProtocolBackend>>;
}
