//! PlaybackStateResolver
//!
//! Produces one normalized [`PlaybackSnapshot`] per cycle: the cloud state is
//! the base, and when the active device speaks the local protocol its
//! telemetry is overlaid on top. The cloud query is mandatory; everything
//! after it is best-effort.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::backends::metadata::{extract_catalog_uri, parse_didl, parse_hms, CatalogKind, CatalogUri, DidlItem};
use crate::backends::{CloudBackend, CloudPlaybackState, LocalHandlePool, LocalProtocolBackend, LocalTrackInfo};
use crate::bus::SharedBus;
use crate::devices::{select_target, DeviceCache, LocalAddress, LocalProtocolTarget, Target};
use crate::error::{best_effort, BackendError};
use crate::model::{AllowedAction, Backend, DeviceRef, ItemKind, PlaybackSnapshot, TrackOrEpisode};

/// Result of one resolution cycle.
pub struct Resolution {
    pub snapshot: PlaybackSnapshot,
    /// Device the snapshot was resolved against
    pub device: Option<DeviceRef>,
    /// Local handle used for the overlay, if one succeeded
    pub local: Option<Arc<dyn LocalProtocolBackend>>,
}

pub struct PlaybackStateResolver {
    cloud: Arc<dyn CloudBackend>,
    devices: Arc<DeviceCache>,
    pool: Arc<LocalHandlePool>,
    bus: SharedBus,
}

impl PlaybackStateResolver {
    pub fn new(
        cloud: Arc<dyn CloudBackend>,
        devices: Arc<DeviceCache>,
        pool: Arc<LocalHandlePool>,
        bus: SharedBus,
    ) -> Self {
        Self {
            cloud,
            devices,
            pool,
            bus,
        }
    }

    /// Resolve the current playback state.
    ///
    /// `selected` is the explicitly selected device; it only matters when the
    /// cloud does not name the active device.
    pub async fn resolve(&self, selected: Option<&DeviceRef>) -> Result<Resolution, BackendError> {
        let cloud_state = self.cloud.get_playback_state().await?;

        best_effort(
            &self.bus,
            "refresh device list",
            self.devices.refresh(self.cloud.as_ref(), false),
        )
        .await;

        let device = self.active_device(cloud_state.as_ref(), selected).await;
        let base = cloud_snapshot(cloud_state.as_ref(), device.clone());

        let (snapshot, local) = match select_target(device.clone()) {
            Target::LocalProtocol(target) => {
                let overlay = best_effort(
                    &self.bus,
                    "local overlay",
                    self.overlay_local(&target, cloud_state.as_ref(), &base),
                )
                .await;
                match overlay {
                    Some((snapshot, handle)) => (snapshot, Some(handle)),
                    None => {
                        self.pool.evict(&target.address).await;
                        (base, None)
                    }
                }
            }
            Target::Cloud(_) => (base, None),
        };

        Ok(Resolution {
            snapshot: snapshot.normalized(),
            device,
            local,
        })
    }

    /// Pick the device the snapshot describes.
    ///
    /// A device the cloud names wins. Without a name: explicit selection,
    /// then the configured default, then whatever id the cloud reported.
    async fn active_device(
        &self,
        cloud_state: Option<&CloudPlaybackState>,
        selected: Option<&DeviceRef>,
    ) -> Option<DeviceRef> {
        let reported = cloud_state.and_then(|s| s.device.as_ref());

        if let Some(reported) = reported.filter(|d| !d.display_name.is_empty()) {
            let cached = match self.devices.resolve(&reported.display_name).await {
                Some(device) => Some(device),
                None => self.devices.resolve(&reported.id).await,
            };
            return Some(match cached {
                Some(cached) => DeviceRef {
                    volume_percent: reported.volume_percent,
                    is_active: reported.is_active,
                    ..cached
                },
                None => reported.clone(),
            });
        }

        if let Some(selected) = selected {
            return Some(selected.clone());
        }
        if let Some(default) = self.devices.resolve(crate::devices::DEFAULT_DEVICE_WILDCARD).await {
            return Some(default);
        }
        match reported {
            Some(reported) => Some(
                self.devices
                    .resolve(&reported.id)
                    .await
                    .unwrap_or_else(|| reported.clone()),
            ),
            None => None,
        }
    }

    async fn overlay_local(
        &self,
        target: &LocalProtocolTarget,
        cloud_state: Option<&CloudPlaybackState>,
        base: &PlaybackSnapshot,
    ) -> Result<(PlaybackSnapshot, Arc<dyn LocalProtocolBackend>), BackendError> {
        let handle = self.pool.get(&target.address).await?;
        // Read-only queries; safe to issue together
        let (transport, info, volume) = futures::try_join!(
            handle.get_transport_info(),
            handle.get_track_info(),
            handle.get_volume()
        )?;
        debug!(
            "Local overlay for {}: {:?} ({})",
            target.device.display_name, transport.state, transport.status
        );

        let mut snapshot = base.clone();
        snapshot.source = Backend::LocalProtocol;
        snapshot.is_playing = transport.state.is_playing();
        snapshot.volume_percent = Some(volume);
        if let Some(device) = snapshot.active_device.as_mut() {
            device.volume_percent = volume;
        }

        // Cloud flags are authoritative; local play mode only fills gaps
        let play_mode = transport.play_mode;
        snapshot.shuffle_enabled = cloud_state
            .and_then(|s| s.shuffle)
            .or(play_mode.map(|m| m.shuffle))
            .unwrap_or(false);
        snapshot.repeat_mode = cloud_state
            .and_then(|s| s.repeat)
            .or(play_mode.map(|m| m.repeat))
            .unwrap_or_default();

        let item = self
            .reconcile_item(&info, base.item.as_ref(), &target.address)
            .await;
        let same_item = item.is_some() && item.as_ref().map(|i| &i.uri) == base.item.as_ref().map(|i| &i.uri);
        snapshot.progress_ms = match info.position.as_deref().and_then(parse_hms) {
            Some(position) => Some(position),
            None if same_item => base.progress_ms,
            None => None,
        };
        if !same_item {
            // The cloud context belongs to the cloud's item, not this one
            snapshot.context_uri = None;
            snapshot.item_kind = item.as_ref().map(|i| i.kind).unwrap_or(ItemKind::Unknown);
            if cloud_state.is_none() && item.is_some() {
                snapshot.allowed_actions = AllowedAction::ALL.into_iter().collect();
            }
        }
        snapshot.item = item;

        Ok((snapshot, handle))
    }

    /// Work out what the local speaker is actually playing.
    ///
    /// The catalog URI embedded in local metadata wins over the cloud item
    /// when they disagree. An authoritative catalog lookup is tried first;
    /// if that fails the item is synthesized from local metadata.
    async fn reconcile_item(
        &self,
        info: &LocalTrackInfo,
        cloud_item: Option<&TrackOrEpisode>,
        address: &LocalAddress,
    ) -> Option<TrackOrEpisode> {
        let didl = info.embedded_metadata.as_deref().and_then(parse_didl);
        let local_uri = info
            .uri
            .as_deref()
            .and_then(extract_catalog_uri)
            .or_else(|| didl.as_ref()?.res_uri.as_deref().and_then(extract_catalog_uri));

        let Some(uri) = local_uri else {
            let has_local_metadata = info.title.is_some() || didl.as_ref().is_some_and(|d| d.title.is_some());
            return match cloud_item {
                Some(item) => Some(item.clone()),
                None if has_local_metadata => Some(synthesize_item(info, didl.as_ref(), None, address)),
                None => None,
            };
        };

        let uri_string = uri.to_string();
        if let Some(item) = cloud_item.filter(|i| i.uri.as_deref() == Some(uri_string.as_str())) {
            return Some(item.clone());
        }

        debug!("Local speaker reports {}, looking it up", uri_string);
        let lookup = match uri.kind {
            CatalogKind::Track => best_effort(&self.bus, "catalog lookup", self.cloud.get_track(&uri.id)).await,
            CatalogKind::Episode => best_effort(&self.bus, "catalog lookup", self.cloud.get_episode(&uri.id)).await,
            _ => None,
        };

        match lookup {
            Some(mut item) => {
                if item.image_url.is_none() {
                    item.image_url = local_artwork(info, didl.as_ref(), address);
                }
                Some(item)
            }
            None => Some(synthesize_item(info, didl.as_ref(), Some(&uri), address)),
        }
    }
}

/// Base snapshot from cloud state alone.
fn cloud_snapshot(state: Option<&CloudPlaybackState>, device: Option<DeviceRef>) -> PlaybackSnapshot {
    let volume_percent = device.as_ref().map(|d| d.volume_percent);
    let Some(state) = state else {
        return PlaybackSnapshot {
            active_device: device,
            volume_percent,
            ..PlaybackSnapshot::idle()
        };
    };

    let allowed_actions: BTreeSet<AllowedAction> = if state.item.is_some() {
        AllowedAction::ALL
            .into_iter()
            .filter(|a| !state.disallowed_actions.contains(a))
            .collect()
    } else {
        BTreeSet::new()
    };

    PlaybackSnapshot {
        is_playing: state.is_playing,
        shuffle_enabled: state.shuffle.unwrap_or(false),
        repeat_mode: state.repeat.unwrap_or_default(),
        progress_ms: state.progress_ms,
        item_kind: state.item.as_ref().map(|i| i.kind).unwrap_or_default(),
        item: state.item.clone(),
        context_uri: state.context_uri.clone(),
        active_device: device,
        volume_percent,
        allowed_actions,
        ..PlaybackSnapshot::idle()
    }
}

/// Minimal item built from whatever the speaker reported.
fn synthesize_item(
    info: &LocalTrackInfo,
    didl: Option<&DidlItem>,
    uri: Option<&CatalogUri>,
    address: &LocalAddress,
) -> TrackOrEpisode {
    let is_episode = uri.map(|u| u.kind == CatalogKind::Episode).unwrap_or(false)
        || didl.is_some_and(|d| d.is_episode());
    let kind = match uri.map(|u| u.kind.item_kind()) {
        Some(kind) if kind != ItemKind::Unknown => kind,
        _ if is_episode => ItemKind::Episode,
        _ => ItemKind::Track,
    };

    let name = info
        .title
        .clone()
        .or_else(|| didl.and_then(|d| d.title.clone()))
        .unwrap_or_default();
    let artist = info.artist.clone().or_else(|| didl.and_then(|d| d.creator.clone()));
    // Episodes carry their show name in the embedded tags
    let album = match kind {
        ItemKind::Episode => didl
            .and_then(|d| d.show.clone())
            .or_else(|| info.album.clone()),
        _ => info.album.clone().or_else(|| didl.and_then(|d| d.album.clone())),
    };
    let duration_ms = info
        .duration
        .as_deref()
        .and_then(parse_hms)
        .or_else(|| didl.and_then(|d| d.duration_ms))
        .unwrap_or(0);

    TrackOrEpisode {
        uri: uri.map(|u| u.to_string()),
        kind,
        name,
        artists: artist.into_iter().collect(),
        album,
        duration_ms,
        image_url: local_artwork(info, didl, address),
    }
}

fn local_artwork(info: &LocalTrackInfo, didl: Option<&DidlItem>, address: &LocalAddress) -> Option<String> {
    let art = info
        .artwork_url
        .as_deref()
        .or_else(|| didl.and_then(|d| d.album_art_uri.as_deref()))?;
    address.resolve_url(art)
}
