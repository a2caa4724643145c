//! Backend-agnostic playback model.
//!
//! Every type here is a value snapshot: devices and playback state are copied
//! out of the caches that own them, never handed out as live handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::PlayerError;

// =============================================================================
// Enumerations
// =============================================================================

/// Repeat mode shared by both backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::One => write!(f, "one"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for RepeatMode {
    type Err = PlayerError;

    /// Accepts both the normalized names and the cloud API's
    /// `track`/`context` spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "one" | "track" => Ok(Self::One),
            "all" | "context" => Ok(Self::All),
            other => Err(PlayerError::InvalidArgument(format!(
                "unsupported repeat mode: {:?}",
                other
            ))),
        }
    }
}

/// Kind of the currently playing item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Track,
    Episode,
    #[default]
    Unknown,
}

/// Render target brand. Only one brand speaks the local protocol.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceBrand {
    #[default]
    Generic,
    LocalProtocol,
}

/// Transport actions the active item currently allows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AllowedAction {
    Next,
    Previous,
    Seek,
    Shuffle,
    Repeat,
}

impl AllowedAction {
    pub const ALL: [AllowedAction; 5] = [
        AllowedAction::Next,
        AllowedAction::Previous,
        AllowedAction::Seek,
        AllowedAction::Shuffle,
        AllowedAction::Repeat,
    ];
}

/// Which backend produced or handles something.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Cloud,
    LocalProtocol,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::LocalProtocol => write!(f, "local"),
        }
    }
}

// =============================================================================
// Devices
// =============================================================================

/// A controllable render target, copied out of the device cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRef {
    /// Backend-specific id (cloud device id, or `local:<name>` for speakers
    /// the cloud does not list)
    pub id: String,
    pub display_name: String,
    pub brand: DeviceBrand,
    pub volume_percent: u8,
    pub is_active: bool,
    pub supports_volume: bool,
    /// Network address from local discovery (`host` or `host:port`)
    #[serde(default)]
    pub local_address: Option<String>,
}

impl DeviceRef {
    /// A generic cloud-only device.
    pub fn cloud(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            brand: DeviceBrand::Generic,
            volume_percent: 0,
            is_active: false,
            supports_volume: true,
            local_address: None,
        }
    }

    /// Whether this device was discovered locally but is unknown to the cloud.
    pub fn is_local_only(&self) -> bool {
        self.id.starts_with(LOCAL_ONLY_ID_PREFIX)
    }

    /// Id to hand to the cloud backend, if the cloud knows this device.
    pub fn cloud_id(&self) -> Option<&str> {
        if self.is_local_only() {
            None
        } else {
            Some(self.id.as_str())
        }
    }
}

/// Id prefix for devices that only local discovery knows about.
pub const LOCAL_ONLY_ID_PREFIX: &str = "local:";

// =============================================================================
// Items
// =============================================================================

/// Track or podcast episode metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackOrEpisode {
    /// Catalog URI (`spotify:track:<id>`); `None` for items synthesized from
    /// local metadata that carried no catalog identity
    pub uri: Option<String>,
    pub kind: ItemKind,
    pub name: String,
    pub artists: Vec<String>,
    /// Album name (tracks) or show name (episodes)
    pub album: Option<String>,
    pub duration_ms: u64,
    pub image_url: Option<String>,
}

/// Lightweight reference to a catalog item (queue entries, album lists).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRef {
    pub uri: String,
    pub name: Option<String>,
}

impl ItemRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }
}

// =============================================================================
// PlaybackSnapshot
// =============================================================================

/// Normalized view of what is playing right now.
///
/// Constructed fresh on every resolution cycle and published behind an `Arc`;
/// never mutated in place. Use [`PlaybackSnapshot::normalized`] before
/// publishing so the progress/duration invariant holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub is_muted: bool,
    pub shuffle_enabled: bool,
    pub repeat_mode: RepeatMode,
    pub progress_ms: Option<u64>,
    pub item_kind: ItemKind,
    pub item: Option<TrackOrEpisode>,
    /// Album/playlist/show the item is played from
    pub context_uri: Option<String>,
    /// Device playback is rendered on; `None` when no backend reports one
    pub active_device: Option<DeviceRef>,
    /// Volume reported by the backend that owns the device
    pub volume_percent: Option<u8>,
    pub allowed_actions: BTreeSet<AllowedAction>,
    /// Backend whose telemetry shaped this snapshot
    pub source: Backend,
    pub resolved_at: DateTime<Utc>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

impl PlaybackSnapshot {
    /// Snapshot for "nothing is active".
    pub fn idle() -> Self {
        Self {
            is_playing: false,
            is_muted: false,
            shuffle_enabled: false,
            repeat_mode: RepeatMode::Off,
            progress_ms: None,
            item_kind: ItemKind::Unknown,
            item: None,
            context_uri: None,
            active_device: None,
            volume_percent: None,
            allowed_actions: BTreeSet::new(),
            source: Backend::Cloud,
            resolved_at: Utc::now(),
        }
    }

    /// Enforce the snapshot invariants:
    /// - progress never exceeds a known item duration (0 means unknown)
    /// - no item means no progress, unknown kind and not playing
    /// - the item kind mirrors the item
    pub fn normalized(mut self) -> Self {
        match &self.item {
            Some(item) => {
                self.item_kind = item.kind;
                if let Some(progress) = self.progress_ms {
                    if item.duration_ms > 0 && progress > item.duration_ms {
                        self.progress_ms = Some(item.duration_ms);
                    }
                }
            }
            None => {
                self.item_kind = ItemKind::Unknown;
                self.progress_ms = None;
                self.is_playing = false;
            }
        }
        self
    }

    /// Seconds left in the current item, when both ends are known.
    /// Streams and other items without a duration have no end.
    pub fn remaining_secs(&self) -> Option<u64> {
        let item = self.item.as_ref().filter(|i| i.duration_ms > 0)?;
        let progress = self.progress_ms?;
        Some(item.duration_ms.saturating_sub(progress) / 1000)
    }

    pub fn allows(&self, action: AllowedAction) -> bool {
        self.allowed_actions.contains(&action)
    }
}
