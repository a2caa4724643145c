//! In-memory mock backends for integration testing
//!
//! `MockCloud` and `MockSpeaker` record every call as a short string so tests
//! can assert on exact call order. Individual methods can be made to fail.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use unified_cloud_player::backends::{
    BackendResult, CloudBackend, CloudPlaybackState, LocalConnector, LocalProtocolBackend,
    LocalTrackInfo, MusicSource, PlayMode, QueueInfo, TransportInfo, TransportState,
};
use unified_cloud_player::bus::{create_bus, BusEvent, SharedBus};
use unified_cloud_player::config::PlayerConfig;
use unified_cloud_player::devices::{DiscoveredSpeaker, LocalAddress};
use unified_cloud_player::model::{DeviceRef, ItemKind, ItemRef, RepeatMode, TrackOrEpisode};
use unified_cloud_player::{BackendError, Player};

pub const DEN_ADDRESS: &str = "10.0.0.5";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

// =============================================================================
// Cloud
// =============================================================================

#[derive(Default)]
pub struct MockCloud {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    pub playback: Mutex<Option<CloudPlaybackState>>,
    pub devices: Mutex<Vec<DeviceRef>>,
    pub queue: Mutex<QueueInfo>,
    pub catalog: Mutex<HashMap<String, TrackOrEpisode>>,
    pub artist_albums: Mutex<HashMap<String, Vec<ItemRef>>>,
}

impl MockCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    pub fn recover(&self, method: &'static str) {
        self.failing.lock().unwrap().remove(method);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_playback(&self, state: Option<CloudPlaybackState>) {
        *self.playback.lock().unwrap() = state;
    }

    pub fn set_devices(&self, devices: Vec<DeviceRef>) {
        *self.devices.lock().unwrap() = devices;
    }

    fn call(&self, method: &'static str, detail: String) -> BackendResult<()> {
        let entry = if detail.is_empty() {
            method.to_string()
        } else {
            format!("{} {}", method, detail)
        };
        self.calls.lock().unwrap().push(entry);
        if self.failing.lock().unwrap().contains(method) {
            return Err(BackendError::cloud(format!("{} failed", method)));
        }
        Ok(())
    }
}

fn dev(device_id: Option<&str>) -> String {
    device_id.unwrap_or("-").to_string()
}

#[async_trait]
impl CloudBackend for MockCloud {
    async fn get_playback_state(&self) -> BackendResult<Option<CloudPlaybackState>> {
        self.call("get_playback_state", String::new())?;
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn resume(&self, device_id: Option<&str>) -> BackendResult<()> {
        self.call("resume", dev(device_id))
    }

    async fn pause(&self, device_id: Option<&str>) -> BackendResult<()> {
        self.call("pause", dev(device_id))
    }

    async fn skip_next(&self, device_id: Option<&str>) -> BackendResult<()> {
        self.call("skip_next", dev(device_id))
    }

    async fn skip_previous(&self, device_id: Option<&str>) -> BackendResult<()> {
        self.call("skip_previous", dev(device_id))
    }

    async fn seek(&self, position_ms: u64, device_id: Option<&str>) -> BackendResult<()> {
        self.call("seek", format!("{} {}", position_ms, dev(device_id)))
    }

    async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> BackendResult<()> {
        self.call("set_volume", format!("{} {}", percent, dev(device_id)))
    }

    async fn set_shuffle(&self, enabled: bool, device_id: Option<&str>) -> BackendResult<()> {
        self.call("set_shuffle", format!("{} {}", enabled, dev(device_id)))
    }

    async fn set_repeat(&self, mode: RepeatMode, device_id: Option<&str>) -> BackendResult<()> {
        self.call("set_repeat", format!("{} {}", mode, dev(device_id)))
    }

    async fn play_context(
        &self,
        context_uri: &str,
        offset: usize,
        _position_ms: Option<u64>,
        device_id: Option<&str>,
    ) -> BackendResult<()> {
        self.call(
            "play_context",
            format!("{} {} {}", context_uri, offset, dev(device_id)),
        )
    }

    async fn play_items(
        &self,
        uris: &[String],
        offset: usize,
        _position_ms: Option<u64>,
        device_id: Option<&str>,
    ) -> BackendResult<()> {
        self.call(
            "play_items",
            format!("{} {} {}", uris.join(","), offset, dev(device_id)),
        )
    }

    async fn add_to_queue(&self, uri: &str, device_id: Option<&str>) -> BackendResult<()> {
        self.call("add_to_queue", format!("{} {}", uri, dev(device_id)))
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> BackendResult<()> {
        self.call("transfer_playback", format!("{} {}", device_id, play))
    }

    async fn get_devices(&self, refresh: bool) -> BackendResult<Vec<DeviceRef>> {
        self.call("get_devices", refresh.to_string())?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_queue(&self) -> BackendResult<QueueInfo> {
        self.call("get_queue", String::new())?;
        Ok(self.queue.lock().unwrap().clone())
    }

    async fn get_track(&self, id: &str) -> BackendResult<TrackOrEpisode> {
        self.call("get_track", id.to_string())?;
        self.catalog
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn get_episode(&self, id: &str) -> BackendResult<TrackOrEpisode> {
        self.call("get_episode", id.to_string())?;
        self.catalog
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn get_artist_albums(&self, artist_id: &str) -> BackendResult<Vec<ItemRef>> {
        self.call("get_artist_albums", artist_id.to_string())?;
        Ok(self
            .artist_albums
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Local speaker
// =============================================================================

/// How the speaker reacts to `activate_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Switches to the cloud source straight away
    Immediate,
    /// Accepts the call but never switches
    Never,
    /// Refuses with `Unsupported`
    Unsupported,
}

pub struct MockSpeaker {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    pub transport: Mutex<TransportInfo>,
    pub track: Mutex<LocalTrackInfo>,
    pub volume: Mutex<u8>,
    pub source: Mutex<MusicSource>,
    pub activation: Mutex<Activation>,
    pub queue: Mutex<Vec<String>>,
}

impl MockSpeaker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            transport: Mutex::new(TransportInfo {
                state: TransportState::Stopped,
                status: "OK".to_string(),
                play_mode: Some(PlayMode {
                    shuffle: false,
                    repeat: RepeatMode::Off,
                }),
            }),
            track: Mutex::new(LocalTrackInfo::default()),
            volume: Mutex::new(25),
            source: Mutex::new(MusicSource::Other("line_in".to_string())),
            activation: Mutex::new(Activation::Immediate),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    pub fn set_activation(&self, activation: Activation) {
        *self.activation.lock().unwrap() = activation;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change speaker state (queries filtered out).
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    fn call(&self, method: &'static str, detail: String) -> BackendResult<()> {
        let entry = if detail.is_empty() {
            method.to_string()
        } else {
            format!("{} {}", method, detail)
        };
        self.calls.lock().unwrap().push(entry);
        if self.failing.lock().unwrap().contains(method) {
            return Err(BackendError::local(format!("{} failed", method)));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalProtocolBackend for MockSpeaker {
    async fn play(&self) -> BackendResult<()> {
        self.call("play", String::new())?;
        self.transport.lock().unwrap().state = TransportState::Playing;
        Ok(())
    }

    async fn pause(&self) -> BackendResult<()> {
        self.call("pause", String::new())?;
        self.transport.lock().unwrap().state = TransportState::Paused;
        Ok(())
    }

    async fn next(&self) -> BackendResult<()> {
        self.call("next", String::new())
    }

    async fn previous(&self) -> BackendResult<()> {
        self.call("previous", String::new())
    }

    async fn seek(&self, position: &str) -> BackendResult<()> {
        self.call("seek", position.to_string())
    }

    async fn get_volume(&self) -> BackendResult<u8> {
        self.call("get_volume", String::new())?;
        Ok(*self.volume.lock().unwrap())
    }

    async fn set_volume(&self, percent: u8) -> BackendResult<()> {
        self.call("set_volume", percent.to_string())?;
        *self.volume.lock().unwrap() = percent;
        Ok(())
    }

    async fn get_transport_info(&self) -> BackendResult<TransportInfo> {
        self.call("get_transport_info", String::new())?;
        Ok(self.transport.lock().unwrap().clone())
    }

    async fn get_track_info(&self) -> BackendResult<LocalTrackInfo> {
        self.call("get_track_info", String::new())?;
        Ok(self.track.lock().unwrap().clone())
    }

    async fn clear_queue(&self) -> BackendResult<()> {
        self.call("clear_queue", String::new())?;
        self.queue.lock().unwrap().clear();
        Ok(())
    }

    async fn enqueue_by_uri(&self, uri: &str) -> BackendResult<usize> {
        self.call("enqueue", uri.to_string())?;
        let mut queue = self.queue.lock().unwrap();
        queue.push(uri.to_string());
        Ok(queue.len() - 1)
    }

    async fn play_from_queue(&self, index: usize) -> BackendResult<()> {
        self.call("play_from_queue", index.to_string())?;
        self.transport.lock().unwrap().state = TransportState::Playing;
        Ok(())
    }

    async fn get_music_source(&self) -> BackendResult<MusicSource> {
        self.call("get_music_source", String::new())?;
        Ok(self.source.lock().unwrap().clone())
    }

    async fn activate_source(&self) -> BackendResult<()> {
        self.call("activate_source", String::new())?;
        match *self.activation.lock().unwrap() {
            Activation::Immediate => {
                *self.source.lock().unwrap() = MusicSource::CloudIntegration;
                Ok(())
            }
            Activation::Never => Ok(()),
            Activation::Unsupported => Err(BackendError::Unsupported(
                "source switching not available".to_string(),
            )),
        }
    }
}

/// Connector serving registered speakers by address.
#[derive(Default)]
pub struct MockConnector {
    speakers: Mutex<HashMap<String, Arc<MockSpeaker>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: &str, speaker: Arc<MockSpeaker>) {
        let key = LocalAddress::parse(address).unwrap().to_string();
        self.speakers.lock().unwrap().insert(key, speaker);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalConnector for MockConnector {
    async fn connect(&self, address: &LocalAddress) -> BackendResult<Arc<dyn LocalProtocolBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let speaker = self
            .speakers
            .lock()
            .unwrap()
            .get(&address.to_string())
            .cloned()
            .ok_or_else(|| BackendError::local(format!("{} unreachable", address)))?;
        Ok(speaker as Arc<dyn LocalProtocolBackend>)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn track(id: &str, duration_ms: u64) -> TrackOrEpisode {
    TrackOrEpisode {
        uri: Some(format!("spotify:track:{}", id)),
        kind: ItemKind::Track,
        name: format!("Track {}", id),
        artists: vec!["Artist".to_string()],
        album: Some("Album".to_string()),
        duration_ms,
        image_url: None,
    }
}

pub fn kitchen() -> DeviceRef {
    DeviceRef {
        volume_percent: 40,
        ..DeviceRef::cloud("k1", "Kitchen")
    }
}

pub fn office() -> DeviceRef {
    DeviceRef::cloud("o1", "Office")
}

pub fn den() -> DeviceRef {
    DeviceRef::cloud("d1", "Den")
}

/// Cloud state: `item` playing on `device` at `progress_ms`.
pub fn playing_on(device: DeviceRef, item: TrackOrEpisode, progress_ms: u64) -> CloudPlaybackState {
    CloudPlaybackState {
        is_playing: true,
        shuffle: Some(false),
        repeat: Some(RepeatMode::Off),
        progress_ms: Some(progress_ms),
        item: Some(item),
        context_uri: None,
        device: Some(DeviceRef {
            is_active: true,
            ..device
        }),
        disallowed_actions: Default::default(),
    }
}

/// Config with no settle delay and short source-settle waits.
pub fn fast_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.commands.settle_delay_ms = 0;
    config.commands.source_settle_timeout_ms = 40;
    config.commands.source_poll_interval_ms = 5;
    config
}

pub struct Harness {
    pub player: Arc<Player>,
    pub cloud: Arc<MockCloud>,
    pub speaker: Arc<MockSpeaker>,
    pub connector: Arc<MockConnector>,
    pub bus: SharedBus,
    pub shutdown: CancellationToken,
}

impl Harness {
    /// Kitchen/Office/Den on the cloud; Den is also a local speaker.
    pub async fn new(config: PlayerConfig) -> Self {
        init_tracing();
        let cloud = MockCloud::new();
        cloud.set_devices(vec![kitchen(), office(), den()]);

        let speaker = MockSpeaker::new();
        let connector = MockConnector::new();
        connector.register(DEN_ADDRESS, speaker.clone());

        let bus = create_bus();
        let shutdown = CancellationToken::new();
        let player = Arc::new(Player::new(
            config,
            cloud.clone(),
            connector.clone(),
            bus.clone(),
            shutdown.clone(),
        ));
        player
            .update_discovered(vec![DiscoveredSpeaker {
                name: "Den".to_string(),
                address: DEN_ADDRESS.to_string(),
            }])
            .await;

        Self {
            player,
            cloud,
            speaker,
            connector,
            bus,
            shutdown,
        }
    }

    pub async fn fast() -> Self {
        Self::new(fast_config()).await
    }
}

/// Collect bus events already queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<BusEvent>) -> Vec<BusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for a matching event with timeout.
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<BusEvent>, predicate: F, timeout_ms: u64) -> Option<BusEvent>
where
    F: Fn(&BusEvent) -> bool,
{
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
