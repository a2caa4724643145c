//! CommandRouter
//!
//! One method per user-facing action. Each command picks its backend once
//! through [`select_target`], runs inside a [`ReentrancyGuard`] scope and the
//! operation lock, and settles after every mutating backend call.
//!
//! Two compound commands emulate what the local protocol lacks:
//! - `play_content` builds a local queue from catalog data
//! - `transfer_playback` activates the speaker's cloud source, or mirrors
//!   the cloud queue when that is impossible

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::metadata::{format_hms, CatalogKind, CatalogUri};
use crate::backends::{BackendResult, CloudBackend, LocalHandlePool, LocalProtocolBackend, MusicSource};
use crate::bus::{BusEvent, SharedBus};
use crate::config::CommandsConfig;
use crate::devices::{select_target, DeviceCache, LocalProtocolTarget, Target, DEFAULT_DEVICE_WILDCARD};
use crate::error::{best_effort, BackendError, Degradation, PlayerError};
use crate::guard::ReentrancyGuard;
use crate::model::{DeviceRef, PlaybackSnapshot, RepeatMode};
use crate::state::SharedState;

/// Volume restored by unmute when nothing was saved.
pub const DEFAULT_UNMUTE_VOLUME: u8 = 50;

/// Content for [`CommandRouter::play_content`].
///
/// Either a single context (album, playlist, show, artist) or a list of
/// tracks/episodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayContent {
    pub uris: Vec<CatalogUri>,
    /// Index of the first item to play (track offset inside a context)
    pub offset: usize,
    pub position_ms: Option<u64>,
}

impl PlayContent {
    pub fn new(uris: Vec<CatalogUri>) -> Self {
        Self {
            uris,
            offset: 0,
            position_ms: None,
        }
    }

    /// Parse URIs or share links.
    pub fn parse<S: AsRef<str>>(uris: &[S]) -> Result<Self, PlayerError> {
        let uris = uris
            .iter()
            .map(|u| u.as_ref().parse::<CatalogUri>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(uris))
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_position(mut self, position_ms: u64) -> Self {
        self.position_ms = Some(position_ms);
        self
    }

    /// The single context, if this is context playback.
    pub fn context(&self) -> Option<&CatalogUri> {
        match self.uris.as_slice() {
            [uri] if uri.is_context() => Some(uri),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), PlayerError> {
        if self.uris.is_empty() {
            return Err(PlayerError::InvalidArgument("no content to play".to_string()));
        }
        if self.uris.len() > 1 && self.uris.iter().any(|u| u.is_context()) {
            return Err(PlayerError::InvalidArgument(
                "a context must be played on its own".to_string(),
            ));
        }
        if self.context().is_none() && self.offset >= self.uris.len() {
            return Err(PlayerError::InvalidArgument(format!(
                "offset {} out of range for {} items",
                self.offset,
                self.uris.len()
            )));
        }
        Ok(())
    }
}

/// How a transfer completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The cloud moved playback natively
    Transferred,
    /// The speaker was (or was switched) to the cloud source and resumed
    Activated,
    /// Nothing was playing; the target was simply started
    Started,
    /// The cloud queue was copied into the speaker's local queue
    Mirrored(Degradation),
}

enum SourceCheck {
    Ready,
    Fallback(String),
}

pub struct CommandRouter {
    cloud: Arc<dyn CloudBackend>,
    devices: Arc<DeviceCache>,
    pool: Arc<LocalHandlePool>,
    state: Arc<SharedState>,
    guard: Arc<ReentrancyGuard>,
    bus: SharedBus,
    shutdown: CancellationToken,
    config: CommandsConfig,
}

impl CommandRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cloud: Arc<dyn CloudBackend>,
        devices: Arc<DeviceCache>,
        pool: Arc<LocalHandlePool>,
        state: Arc<SharedState>,
        guard: Arc<ReentrancyGuard>,
        bus: SharedBus,
        shutdown: CancellationToken,
        config: CommandsConfig,
    ) -> Self {
        Self {
            cloud,
            devices,
            pool,
            state,
            guard,
            bus,
            shutdown,
            config,
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Resume playback. Displayed state flips immediately; the next poll
    /// corrects it if the backend call failed.
    pub async fn play(&self) -> Result<(), PlayerError> {
        self.run("play", async {
            self.state
                .update(|s| s.is_playing = s.item.is_some())
                .await;
            match self.current_target().await {
                Target::Cloud(t) => self.cloud.resume(t.device_id()).await,
                Target::LocalProtocol(t) => self.with_local(&t, |h| async move { h.play().await }).await,
            }
            .map_err(|e| PlayerError::backend("play", e))?;
            self.settle().await
        })
        .await
    }

    /// Pause playback, optimistically like [`play`](Self::play).
    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.run("pause", async {
            self.state.update(|s| s.is_playing = false).await;
            self.pause_target(self.current_target().await)
                .await
                .map_err(|e| PlayerError::backend("pause", e))?;
            self.settle().await
        })
        .await
    }

    pub async fn next(&self) -> Result<(), PlayerError> {
        self.run("next", async {
            match self.current_target().await {
                Target::Cloud(t) => self.cloud.skip_next(t.device_id()).await,
                Target::LocalProtocol(t) => self.with_local(&t, |h| async move { h.next().await }).await,
            }
            .map_err(|e| PlayerError::backend("next", e))?;
            self.settle().await
        })
        .await
    }

    pub async fn previous(&self) -> Result<(), PlayerError> {
        self.run("previous", async {
            match self.current_target().await {
                Target::Cloud(t) => self.cloud.skip_previous(t.device_id()).await,
                Target::LocalProtocol(t) => {
                    self.with_local(&t, |h| async move { h.previous().await }).await
                }
            }
            .map_err(|e| PlayerError::backend("previous", e))?;
            self.settle().await
        })
        .await
    }

    pub async fn seek(&self, position_ms: u64) -> Result<(), PlayerError> {
        let snapshot = self.state.snapshot().await;
        if let Some(item) = snapshot.item.as_ref().filter(|i| i.duration_ms > 0) {
            if position_ms > item.duration_ms {
                return Err(PlayerError::InvalidArgument(format!(
                    "seek position {}ms beyond item duration {}ms",
                    position_ms, item.duration_ms
                )));
            }
        }

        self.run("seek", async {
            match self.current_target().await {
                Target::Cloud(t) => self.cloud.seek(position_ms, t.device_id()).await,
                Target::LocalProtocol(t) => {
                    let position = format_hms(position_ms);
                    self.with_local(&t, |h| async move { h.seek(&position).await })
                        .await
                }
            }
            .map_err(|e| PlayerError::backend("seek", e))?;
            self.state.update(|s| s.progress_ms = Some(position_ms)).await;
            self.settle().await
        })
        .await
    }

    // =========================================================================
    // Volume
    // =========================================================================

    pub async fn set_volume(&self, percent: u8) -> Result<(), PlayerError> {
        validate_volume(percent)?;
        self.run("set_volume", async {
            self.apply_volume("set_volume", percent).await?;
            self.state.set_muted_volume(None).await;
            self.state
                .update(|s| {
                    s.volume_percent = Some(percent);
                    s.is_muted = false;
                })
                .await;
            self.settle().await
        })
        .await
    }

    /// Neither backend has a mute verb: mute saves the volume and sets 0,
    /// unmute restores it.
    pub async fn set_mute(&self, mute: bool) -> Result<(), PlayerError> {
        self.run("set_mute", async {
            let saved = self.state.muted_volume().await;
            let current = self.state.snapshot().await.volume_percent;

            if mute {
                if saved.is_some() {
                    return Ok(());
                }
                self.apply_volume("set_mute", 0).await?;
                self.state.set_muted_volume(Some(current.unwrap_or(0))).await;
                self.state
                    .update(|s| {
                        s.volume_percent = Some(0);
                        s.is_muted = true;
                    })
                    .await;
            } else {
                if saved.is_none() && current.is_some_and(|v| v > 0) {
                    return Ok(());
                }
                let restore = saved.filter(|v| *v > 0).unwrap_or(DEFAULT_UNMUTE_VOLUME);
                self.apply_volume("set_mute", restore).await?;
                self.state.set_muted_volume(None).await;
                self.state
                    .update(|s| {
                        s.volume_percent = Some(restore);
                        s.is_muted = false;
                    })
                    .await;
            }
            self.settle().await
        })
        .await
    }

    async fn apply_volume(&self, operation: &'static str, percent: u8) -> Result<(), PlayerError> {
        match self.current_target().await {
            Target::Cloud(t) => self.cloud.set_volume(percent, t.device_id()).await,
            Target::LocalProtocol(t) => {
                self.with_local(&t, |h| async move { h.set_volume(percent).await })
                    .await
            }
        }
        .map_err(|e| PlayerError::backend(operation, e))
    }

    // =========================================================================
    // Shuffle / repeat
    // =========================================================================

    /// Always sent to the cloud: it owns these flags for every device.
    pub async fn set_shuffle(&self, enabled: bool) -> Result<(), PlayerError> {
        self.run("set_shuffle", async {
            let device = self.current_device().await;
            self.cloud
                .set_shuffle(enabled, device.as_ref().and_then(|d| d.cloud_id()))
                .await
                .map_err(|e| PlayerError::backend("set_shuffle", e))?;
            self.state.update(|s| s.shuffle_enabled = enabled).await;
            self.settle().await
        })
        .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<(), PlayerError> {
        self.run("set_repeat", async {
            let device = self.current_device().await;
            self.cloud
                .set_repeat(mode, device.as_ref().and_then(|d| d.cloud_id()))
                .await
                .map_err(|e| PlayerError::backend("set_repeat", e))?;
            self.state.update(|s| s.repeat_mode = mode).await;
            self.settle().await
        })
        .await
    }

    // =========================================================================
    // Content
    // =========================================================================

    /// Play content on `device` (name, id or `"*"`), or on the current
    /// device when `None`.
    pub async fn play_content(&self, content: PlayContent, device: Option<&str>) -> Result<(), PlayerError> {
        content.validate()?;
        self.run("play_content", async {
            let device = match device {
                Some(name) => self.resolve_argument(name).await?,
                None => self.current_device().await,
            };

            match select_target(device) {
                Target::Cloud(t) => {
                    let result = match content.context() {
                        Some(context) => {
                            self.cloud
                                .play_context(
                                    &context.to_string(),
                                    content.offset,
                                    content.position_ms,
                                    t.device_id(),
                                )
                                .await
                        }
                        None => {
                            let uris: Vec<String> = content.uris.iter().map(|u| u.to_string()).collect();
                            self.cloud
                                .play_items(&uris, content.offset, content.position_ms, t.device_id())
                                .await
                        }
                    };
                    result.map_err(|e| PlayerError::backend("play_content", e))?;
                    self.settle().await
                }
                Target::LocalProtocol(t) => {
                    let result = self.play_content_local(&t, &content).await;
                    self.evict_on_unavailable(&t, &result).await;
                    result
                }
            }
        })
        .await
    }

    /// Build the speaker's queue from catalog data and start it.
    async fn play_content_local(&self, target: &LocalProtocolTarget, content: &PlayContent) -> Result<(), PlayerError> {
        const OP: &str = "play_content";
        let err = |e| PlayerError::backend(OP, e);

        let mut queue: Vec<String> = Vec::new();
        for uri in &content.uris {
            match uri.kind {
                // Artist contexts cannot be played by reference
                CatalogKind::Artist => {
                    let albums = self.cloud.get_artist_albums(&uri.id).await.map_err(err)?;
                    debug!("Expanded {} to {} albums", uri, albums.len());
                    queue.extend(albums.into_iter().map(|a| a.uri));
                }
                _ => queue.push(uri.to_string()),
            }
        }
        if queue.len() > self.config.max_enqueue_items {
            warn!(
                "Truncating local queue from {} to {} items",
                queue.len(),
                self.config.max_enqueue_items
            );
            queue.truncate(self.config.max_enqueue_items);
        }
        if queue.is_empty() {
            return Err(err(BackendError::NotFound(format!("no playable items for {}", content.uris[0]))));
        }

        let handle = self.pool.get(&target.address).await.map_err(err)?;
        handle.clear_queue().await.map_err(err)?;
        self.settle().await?;

        let mut first_position = None;
        for uri in &queue {
            let position = handle.enqueue_by_uri(uri).await.map_err(err)?;
            first_position.get_or_insert(position);
        }
        self.settle().await?;

        let start = first_position.unwrap_or(0) + content.offset;
        handle.play_from_queue(start).await.map_err(err)?;
        self.settle().await?;

        if let Some(position_ms) = content.position_ms.filter(|p| *p > 0) {
            handle.seek(&format_hms(position_ms)).await.map_err(err)?;
            self.settle().await?;
        }
        info!(
            "Started {} queued items on {}",
            queue.len(),
            target.device.display_name
        );
        Ok(())
    }

    /// Append one track or episode (or, on a local speaker, an album,
    /// playlist or show) to the play queue.
    pub async fn enqueue(&self, uri: CatalogUri, device: Option<&str>) -> Result<(), PlayerError> {
        if uri.kind == CatalogKind::Artist {
            return Err(PlayerError::InvalidArgument(format!("cannot enqueue artist {}", uri)));
        }
        self.run("enqueue", async {
            let device = match device {
                Some(name) => self.resolve_argument(name).await?,
                None => self.current_device().await,
            };
            match select_target(device) {
                Target::Cloud(t) => {
                    if uri.is_context() {
                        return Err(PlayerError::InvalidArgument(format!(
                            "only tracks and episodes can be queued, got {}",
                            uri
                        )));
                    }
                    self.cloud
                        .add_to_queue(&uri.to_string(), t.device_id())
                        .await
                        .map_err(|e| PlayerError::backend("enqueue", e))?;
                }
                Target::LocalProtocol(t) => {
                    let uri = uri.to_string();
                    self.with_local(&t, |h| async move { h.enqueue_by_uri(&uri).await })
                        .await
                        .map_err(|e| PlayerError::backend("enqueue", e))?;
                }
            }
            self.settle().await
        })
        .await
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    /// Move playback to `device`. On failure the previously selected device
    /// is restored before the error propagates.
    pub async fn transfer_playback(&self, device: &str, resume: bool) -> Result<TransferOutcome, PlayerError> {
        if device.trim().is_empty() {
            return Err(PlayerError::InvalidArgument(
                "transfer requires a target device".to_string(),
            ));
        }
        self.run("transfer_playback", async {
            let previous = self.state.selected().await;
            let result = self.transfer_steps(device, resume).await;
            if result.is_err() {
                self.state.select(previous.clone()).await;
                self.bus.publish(BusEvent::SourceChanged {
                    device: previous.map(|d| d.display_name),
                });
            }
            result
        })
        .await
    }

    async fn transfer_steps(&self, device: &str, resume: bool) -> Result<TransferOutcome, PlayerError> {
        const OP: &str = "transfer_playback";
        let source = self.state.snapshot().await;

        if source.is_playing {
            let source_target = select_target(source.active_device.clone());
            best_effort(&self.bus, "pause source device", self.pause_target(source_target)).await;
        }

        let target_device = self.resolve_required(device).await?;
        self.state.select(Some(target_device.clone())).await;
        self.bus.publish(BusEvent::SourceChanged {
            device: Some(target_device.display_name.clone()),
        });

        match select_target(Some(target_device)) {
            Target::Cloud(t) => {
                let device_id = t
                    .device_id()
                    .ok_or_else(|| PlayerError::DeviceNotFound(device.to_string()))?;
                self.cloud
                    .transfer_playback(device_id, resume)
                    .await
                    .map_err(|e| PlayerError::backend(OP, e))?;
                self.settle().await?;
                Ok(TransferOutcome::Transferred)
            }
            Target::LocalProtocol(t) => {
                let result = self.transfer_to_local(&t, &source, resume).await;
                self.evict_on_unavailable(&t, &result).await;
                result
            }
        }
    }

    async fn transfer_to_local(
        &self,
        target: &LocalProtocolTarget,
        source: &PlaybackSnapshot,
        resume: bool,
    ) -> Result<TransferOutcome, PlayerError> {
        const OP: &str = "transfer_playback";
        let err = |e| PlayerError::backend(OP, e);
        let handle = self.pool.get(&target.address).await.map_err(err)?;

        if source.item.is_none() {
            handle.play().await.map_err(err)?;
            self.settle().await?;
            return Ok(TransferOutcome::Started);
        }

        match self.ensure_cloud_source(handle.as_ref()).await? {
            SourceCheck::Ready => {
                if resume {
                    handle.play().await.map_err(err)?;
                    self.settle().await?;
                }
                Ok(TransferOutcome::Activated)
            }
            SourceCheck::Fallback(reason) => {
                self.mirror_queue(target, handle.as_ref(), source, resume).await?;
                let degradation = Degradation {
                    operation: OP.to_string(),
                    reason,
                };
                warn!(
                    "Transfer to {} degraded to queue mirroring: {}",
                    target.device.display_name, degradation.reason
                );
                self.bus.publish(BusEvent::PartialDegradation {
                    operation: degradation.operation.clone(),
                    reason: degradation.reason.clone(),
                });
                Ok(TransferOutcome::Mirrored(degradation))
            }
        }
    }

    /// Point the speaker at the cloud integration, waiting a bounded time
    /// for the switch. Only cancellation is an error; anything else is a
    /// reason to fall back.
    async fn ensure_cloud_source(&self, handle: &dyn LocalProtocolBackend) -> Result<SourceCheck, PlayerError> {
        match handle.get_music_source().await {
            Ok(MusicSource::CloudIntegration) => return Ok(SourceCheck::Ready),
            Ok(other) => debug!("Speaker source is {:?}, activating", other),
            Err(e) => return Ok(SourceCheck::Fallback(format!("source query failed: {}", e))),
        }

        if let Err(e) = handle.activate_source().await {
            return Ok(SourceCheck::Fallback(format!("source activation failed: {}", e)));
        }

        let deadline = tokio::time::Instant::now() + self.config.source_settle_timeout();
        loop {
            self.sleep(self.config.source_poll_interval()).await?;
            match handle.get_music_source().await {
                Ok(MusicSource::CloudIntegration) => return Ok(SourceCheck::Ready),
                Ok(_) => {}
                Err(e) => debug!("Source poll failed: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(SourceCheck::Fallback(format!(
                    "source did not settle within {}ms",
                    self.config.source_settle_timeout_ms
                )));
            }
        }
    }

    /// Copy the source's current item and next queued items into the
    /// speaker's queue and pick up at the source's last position.
    async fn mirror_queue(
        &self,
        target: &LocalProtocolTarget,
        handle: &dyn LocalProtocolBackend,
        source: &PlaybackSnapshot,
        resume: bool,
    ) -> Result<(), PlayerError> {
        let err = |e| PlayerError::backend("transfer_playback", e);
        let queue = self.cloud.get_queue().await.map_err(err)?;

        let current = queue
            .currently_playing
            .map(|i| i.uri)
            .or_else(|| source.item.as_ref().and_then(|i| i.uri.clone()));
        let uris: Vec<String> = current
            .into_iter()
            .chain(
                queue
                    .queue
                    .into_iter()
                    .take(self.config.mirror_queue_items)
                    .map(|i| i.uri),
            )
            .collect();
        if uris.is_empty() {
            return Err(err(BackendError::NotFound("nothing to mirror".to_string())));
        }

        handle.clear_queue().await.map_err(err)?;
        self.settle().await?;
        for uri in &uris {
            handle.enqueue_by_uri(uri).await.map_err(err)?;
        }
        self.settle().await?;
        handle.play_from_queue(0).await.map_err(err)?;
        self.settle().await?;

        if let Some(progress) = source.progress_ms.filter(|p| *p > 0) {
            handle.seek(&format_hms(progress)).await.map_err(err)?;
            self.settle().await?;
        }
        if !resume {
            handle.pause().await.map_err(err)?;
        }
        info!(
            "Mirrored {} items to {}",
            uris.len(),
            target.device.display_name
        );
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Resolve a device, forcing one device refresh on a miss.
    pub async fn resolve_required(&self, name_or_id: &str) -> Result<DeviceRef, PlayerError> {
        if let Some(device) = self.devices.resolve(name_or_id).await {
            return Ok(device);
        }
        self.devices
            .refresh(self.cloud.as_ref(), true)
            .await
            .map_err(|e| PlayerError::backend("resolve_device", e))?;
        self.devices
            .resolve(name_or_id)
            .await
            .ok_or_else(|| PlayerError::DeviceNotFound(name_or_id.to_string()))
    }

    /// Resolve a command's device argument. `"*"` is the configured default
    /// device, or `None` (whichever device the cloud considers active) when
    /// no default is configured or it cannot be found.
    async fn resolve_argument(&self, name_or_id: &str) -> Result<Option<DeviceRef>, PlayerError> {
        if name_or_id.trim() != DEFAULT_DEVICE_WILDCARD {
            return self.resolve_required(name_or_id).await.map(Some);
        }
        if let Some(device) = self.devices.resolve(DEFAULT_DEVICE_WILDCARD).await {
            return Ok(Some(device));
        }
        let Some(default) = self.devices.default_device() else {
            return Ok(None);
        };

        best_effort(
            &self.bus,
            "refresh device list",
            self.devices.refresh(self.cloud.as_ref(), true),
        )
        .await;
        let device = self.devices.resolve(DEFAULT_DEVICE_WILDCARD).await;
        if device.is_none() {
            warn!("Default device {} not found, using the active device", default);
        }
        Ok(device)
    }

    /// Device commands apply to: the snapshot's active device, else the
    /// explicit selection.
    async fn current_device(&self) -> Option<DeviceRef> {
        match self.state.snapshot().await.active_device.clone() {
            Some(device) => Some(device),
            None => self.state.selected().await,
        }
    }

    async fn current_target(&self) -> Target {
        select_target(self.current_device().await)
    }

    async fn pause_target(&self, target: Target) -> BackendResult<()> {
        match target {
            Target::Cloud(t) => self.cloud.pause(t.device_id()).await,
            Target::LocalProtocol(t) => self.with_local(&t, |h| async move { h.pause().await }).await,
        }
    }

    /// Run one call against a pooled local handle, evicting it when the
    /// speaker is unreachable.
    async fn with_local<T, F, Fut>(&self, target: &LocalProtocolTarget, f: F) -> BackendResult<T>
    where
        F: FnOnce(Arc<dyn LocalProtocolBackend>) -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let handle = self.pool.get(&target.address).await?;
        let result = f(handle).await;
        if matches!(result, Err(BackendError::Unavailable { .. })) {
            self.pool.evict(&target.address).await;
        }
        result
    }

    async fn evict_on_unavailable<T>(&self, target: &LocalProtocolTarget, result: &Result<T, PlayerError>) {
        if let Err(e) = result {
            if matches!(e.backend_cause(), Some(BackendError::Unavailable { .. })) {
                self.pool.evict(&target.address).await;
            }
        }
    }

    /// Wrap a command: reentrancy scope, operation lock, completion event.
    async fn run<T, Fut>(&self, command: &'static str, fut: Fut) -> Result<T, PlayerError>
    where
        Fut: Future<Output = Result<T, PlayerError>>,
    {
        let _scope = self.guard.enter();
        let _ops = self.state.lock_ops().await;
        debug!("Command: {}", command);

        let result = fut.await;
        if let Err(e) = &result {
            warn!("Command {} failed: {}", command, e);
        }
        self.bus.publish(BusEvent::CommandCompleted {
            command: command.to_string(),
            success: result.is_ok(),
        });
        result
    }

    /// Fixed post-mutation wait, cut short by shutdown.
    async fn settle(&self) -> Result<(), PlayerError> {
        self.sleep(self.config.settle_delay()).await
    }

    async fn sleep(&self, duration: std::time::Duration) -> Result<(), PlayerError> {
        if self.shutdown.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(PlayerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn validate_volume(percent: u8) -> Result<(), PlayerError> {
    if percent > 100 {
        return Err(PlayerError::InvalidArgument(format!(
            "volume {} outside 0-100",
            percent
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> CatalogUri {
        CatalogUri::new(CatalogKind::Track, id)
    }

    #[test]
    fn test_play_content_validation() {
        assert!(PlayContent::new(vec![]).validate().is_err());
        assert!(PlayContent::new(vec![track("a"), track("b")])
            .with_offset(1)
            .validate()
            .is_ok());
        assert!(PlayContent::new(vec![track("a")]).with_offset(1).validate().is_err());

        let album = CatalogUri::new(CatalogKind::Album, "x");
        assert!(PlayContent::new(vec![album.clone()]).with_offset(7).validate().is_ok());
        assert!(PlayContent::new(vec![album, track("a")]).validate().is_err());
    }

    #[test]
    fn test_play_content_parse_accepts_links() {
        let content = PlayContent::parse(&[
            "spotify:track:6rqhFgbbKwnb9MLmUQDhG6",
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
        ])
        .unwrap();
        assert_eq!(content.uris.len(), 2);
        assert!(content.context().is_none());

        assert!(matches!(
            PlayContent::parse(&["not-a-uri"]),
            Err(PlayerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_volume_bounds() {
        assert!(validate_volume(0).is_ok());
        assert!(validate_volume(100).is_ok());
        assert!(matches!(validate_volume(101), Err(PlayerError::InvalidArgument(_))));
    }
}
