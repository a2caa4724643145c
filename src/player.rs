//! Player facade
//!
//! The surface the host layer talks to: one `refresh()` per tick, command
//! methods, a read-only snapshot accessor and power control. Owns the
//! scheduler and wires the resolver, router and device cache together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::metadata::CatalogUri;
use crate::backends::{CloudBackend, LocalConnector, LocalHandlePool};
use crate::bus::{BusEvent, SharedBus};
use crate::config::PlayerConfig;
use crate::devices::{DeviceCache, DiscoveredSpeaker};
use crate::error::PlayerError;
use crate::guard::ReentrancyGuard;
use crate::model::{DeviceRef, PlaybackSnapshot, RepeatMode};
use crate::resolver::PlaybackStateResolver;
use crate::router::{CommandRouter, PlayContent, TransferOutcome};
use crate::scheduler::PollingScheduler;
use crate::state::SharedState;

pub struct Player {
    config: PlayerConfig,
    cloud: Arc<dyn CloudBackend>,
    devices: Arc<DeviceCache>,
    resolver: PlaybackStateResolver,
    router: CommandRouter,
    scheduler: Mutex<PollingScheduler>,
    state: Arc<SharedState>,
    guard: Arc<ReentrancyGuard>,
    bus: SharedBus,
    powered: AtomicBool,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        cloud: Arc<dyn CloudBackend>,
        connector: Arc<dyn LocalConnector>,
        bus: SharedBus,
        shutdown: CancellationToken,
    ) -> Self {
        let devices = Arc::new(DeviceCache::new(
            config.default_device.clone(),
            config.hidden_devices.clone(),
            config.device_cache_max_age(),
            bus.clone(),
        ));
        let pool = Arc::new(LocalHandlePool::new(connector));
        let state = Arc::new(SharedState::new());
        let guard = Arc::new(ReentrancyGuard::new(config.polling.post_command_burst));

        let resolver = PlaybackStateResolver::new(cloud.clone(), devices.clone(), pool.clone(), bus.clone());
        let router = CommandRouter::new(
            cloud.clone(),
            devices.clone(),
            pool,
            state.clone(),
            guard.clone(),
            bus.clone(),
            shutdown,
            config.commands.clone(),
        );
        let scheduler = PollingScheduler::new(
            config.polling.baseline_ticks,
            config.polling.near_end_threshold_secs,
            guard.clone(),
        );

        Self {
            config,
            cloud,
            devices,
            resolver,
            router,
            scheduler: Mutex::new(scheduler),
            state,
            guard,
            bus,
            powered: AtomicBool::new(true),
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Scheduler tick. Returns whether a real refresh ran and succeeded.
    ///
    /// Failures are swallowed here: the previous snapshot stays published,
    /// the error is logged and sent on the bus, and the next tick retries.
    pub async fn refresh(&self) -> bool {
        let due = self.scheduler.lock().await.tick(self.is_on());
        if !due {
            return false;
        }
        self.resolve_and_publish().await
    }

    /// Refresh now, bypassing the scheduler (still skipped during commands).
    pub async fn force_refresh(&self) -> bool {
        if !self.is_on() || self.guard.in_command() {
            return false;
        }
        self.resolve_and_publish().await
    }

    async fn resolve_and_publish(&self) -> bool {
        // A command that started after the tick owns the lock; skip this cycle
        let Some(_ops) = self.state.try_lock_ops() else {
            debug!("Refresh skipped: command in flight");
            return false;
        };

        let selected = self.state.selected().await;
        match self.resolver.resolve(selected.as_ref()).await {
            Ok(resolution) => {
                let mut snapshot = resolution.snapshot;
                if self.state.muted_volume().await.is_some() {
                    snapshot.is_muted = snapshot.volume_percent == Some(0);
                }
                self.scheduler.lock().await.observe(&snapshot);
                let snapshot = self.state.publish(snapshot).await;
                self.bus.publish(BusEvent::SnapshotUpdated {
                    snapshot: PlaybackSnapshot::clone(&snapshot),
                });
                true
            }
            Err(e) => {
                warn!("State refresh failed, keeping previous snapshot: {}", e);
                self.bus.publish(BusEvent::RefreshFailed {
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Latest published snapshot.
    pub async fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.state.snapshot().await
    }

    /// Explicitly selected device (the externally visible current source).
    pub async fn selected_device(&self) -> Option<DeviceRef> {
        self.state.selected().await
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Resolve a device name or id, forcing a device refresh on a miss.
    pub async fn resolve_device(&self, name_or_id: &str) -> Result<DeviceRef, PlayerError> {
        self.router.resolve_required(name_or_id).await
    }

    /// Force a device list refresh from the cloud.
    pub async fn refresh_devices(&self) -> Result<Vec<DeviceRef>, PlayerError> {
        self.devices
            .refresh(self.cloud.as_ref(), true)
            .await
            .map_err(|e| PlayerError::backend("refresh_devices", e))?;
        Ok(self.devices.index().await.devices())
    }

    /// Feed locally discovered speakers into the device cache.
    pub async fn update_discovered(&self, speakers: Vec<DiscoveredSpeaker>) {
        self.devices.update_discovered(speakers).await;
    }

    // =========================================================================
    // Power
    // =========================================================================

    pub fn is_on(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    pub async fn turn_on(&self) {
        if self.powered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Player turned on");
        if let Some(hook) = &self.config.power_on_hook {
            self.bus.publish(BusEvent::PowerHook { hook: hook.clone() });
        }
    }

    /// Pause (best-effort) and stop refreshing until turned back on.
    pub async fn turn_off(&self) {
        if !self.is_on() {
            return;
        }
        if self.state.snapshot().await.is_playing {
            if let Err(e) = self.router.pause().await {
                warn!("Pause on power off failed, continuing: {}", e);
                self.bus.publish(BusEvent::BestEffortFailed {
                    step: "pause on power off".to_string(),
                    error: e.to_string(),
                });
            }
        }
        self.powered.store(false, Ordering::SeqCst);
        info!("Player turned off");
        if let Some(hook) = &self.config.power_off_hook {
            self.bus.publish(BusEvent::PowerHook { hook: hook.clone() });
        }
    }

    fn ensure_on(&self) -> Result<(), PlayerError> {
        if self.is_on() {
            Ok(())
        } else {
            Err(PlayerError::InvalidArgument("player is off".to_string()))
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn play(&self) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.play().await
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.pause().await
    }

    pub async fn next(&self) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.next().await
    }

    pub async fn previous(&self) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.previous().await
    }

    pub async fn seek(&self, position_ms: u64) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.seek(position_ms).await
    }

    pub async fn set_volume(&self, percent: u8) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.set_volume(percent).await
    }

    pub async fn set_mute(&self, mute: bool) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.set_mute(mute).await
    }

    pub async fn set_shuffle(&self, enabled: bool) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.set_shuffle(enabled).await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.set_repeat(mode).await
    }

    pub async fn play_content(&self, content: PlayContent, device: Option<&str>) -> Result<(), PlayerError> {
        self.ensure_on()?;
        self.router.play_content(content, device).await
    }

    pub async fn enqueue(&self, uri: &str, device: Option<&str>) -> Result<(), PlayerError> {
        self.ensure_on()?;
        let uri: CatalogUri = uri.parse()?;
        self.router.enqueue(uri, device).await
    }

    pub async fn transfer_playback(&self, device: &str, resume: bool) -> Result<TransferOutcome, PlayerError> {
        self.ensure_on()?;
        self.router.transfer_playback(device, resume).await
    }

    // =========================================================================
    // Polling loop
    // =========================================================================

    /// Drive `refresh()` from a fixed-rate timer until `shutdown` fires.
    pub async fn run_polling(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.polling.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Polling started ({}ms tick, baseline every {} ticks)",
            self.config.polling.tick_interval_ms, self.config.polling.baseline_ticks
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Polling stopped");
                    self.bus.publish(BusEvent::ShuttingDown);
                    break;
                }
                _ = interval.tick() => {
                    self.refresh().await;
                }
            }
        }
    }
}
