//! DeviceCache and backend selection
//!
//! The cache maps human-facing device names and backend ids to [`DeviceRef`]
//! values. It is replaced wholesale on every refresh: readers clone the
//! current `Arc<DeviceIndex>` and therefore always see one complete
//! generation of the device list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backends::CloudBackend;
use crate::bus::{BusEvent, SharedBus};
use crate::error::BackendError;
use crate::model::{Backend, DeviceBrand, DeviceRef, LOCAL_ONLY_ID_PREFIX};

/// Default control port of local-protocol speakers.
pub const LOCAL_PROTOCOL_PORT: u16 = 1400;

/// Sentinel that resolves to the configured default device.
pub const DEFAULT_DEVICE_WILDCARD: &str = "*";

// =============================================================================
// LocalAddress
// =============================================================================

/// Validated network address of a local-protocol speaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalAddress {
    host: String,
    port: u16,
}

impl LocalAddress {
    /// Parse `host` or `host:port`. Anything with a path, query or
    /// credentials is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.contains('/') || value.contains('@') {
            return None;
        }
        let url = url::Url::parse(&format!("http://{}", value)).ok()?;
        if url.query().is_some() || url.path() != "/" {
            return None;
        }
        let host = url.host_str()?.to_string();
        Some(Self {
            host,
            port: url.port().unwrap_or(LOCAL_PROTOCOL_PORT),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://host:port/`, the base for speaker-relative URLs.
    pub fn base_url(&self) -> Option<url::Url> {
        url::Url::parse(&format!("http://{}:{}/", self.host, self.port)).ok()
    }

    /// Resolve a possibly speaker-relative artwork path to an absolute URL.
    pub fn resolve_url(&self, path_or_url: &str) -> Option<String> {
        if let Ok(absolute) = url::Url::parse(path_or_url) {
            return Some(absolute.to_string());
        }
        self.base_url()?
            .join(path_or_url)
            .ok()
            .map(|u| u.to_string())
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Backend selection
// =============================================================================

/// Command target when the cloud API drives the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTarget {
    /// `None` targets whichever device the cloud considers active
    pub device: Option<DeviceRef>,
}

impl CloudTarget {
    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.cloud_id())
    }
}

/// Command target when the speaker's own protocol drives the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProtocolTarget {
    pub device: DeviceRef,
    pub address: LocalAddress,
}

/// Where one operation is sent. Selected once per operation by
/// [`select_target`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Cloud(CloudTarget),
    LocalProtocol(LocalProtocolTarget),
}

impl Target {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Cloud(_) => Backend::Cloud,
            Self::LocalProtocol(_) => Backend::LocalProtocol,
        }
    }

    pub fn device(&self) -> Option<&DeviceRef> {
        match self {
            Self::Cloud(t) => t.device.as_ref(),
            Self::LocalProtocol(t) => Some(&t.device),
        }
    }
}

/// Pure backend choice for a resolved device: local protocol iff the device
/// is of the local-protocol brand and has a usable local address.
pub fn select_backend(device: &DeviceRef) -> Backend {
    match local_address_of(device) {
        Some(_) => Backend::LocalProtocol,
        None => Backend::Cloud,
    }
}

/// Build the command target for an optional resolved device. A missing
/// device targets the cloud's active device.
pub fn select_target(device: Option<DeviceRef>) -> Target {
    match device {
        Some(device) => match local_address_of(&device) {
            Some(address) => Target::LocalProtocol(LocalProtocolTarget { device, address }),
            None => Target::Cloud(CloudTarget {
                device: Some(device),
            }),
        },
        None => Target::Cloud(CloudTarget { device: None }),
    }
}

fn local_address_of(device: &DeviceRef) -> Option<LocalAddress> {
    if device.brand != DeviceBrand::LocalProtocol {
        return None;
    }
    device.local_address.as_deref().and_then(LocalAddress::parse)
}

// =============================================================================
// DeviceCache
// =============================================================================

/// A speaker found by local discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredSpeaker {
    pub name: String,
    pub address: String,
}

/// One immutable generation of the device list.
#[derive(Debug, Default)]
pub struct DeviceIndex {
    by_name: HashMap<String, DeviceRef>,
    by_id: HashMap<String, DeviceRef>,
    /// Raw cloud list this generation was built from (for rebuilds when
    /// discovery changes)
    cloud_devices: Vec<DeviceRef>,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl DeviceIndex {
    fn build(
        cloud_devices: Vec<DeviceRef>,
        discovered: &[DiscoveredSpeaker],
        hidden: &[String],
        last_refreshed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let is_hidden = |device: &DeviceRef| {
            hidden.iter().any(|h| {
                h.eq_ignore_ascii_case(&device.display_name) || h.eq_ignore_ascii_case(&device.id)
            })
        };

        let mut devices: Vec<DeviceRef> = Vec::new();
        let mut matched = vec![false; discovered.len()];

        for cloud in &cloud_devices {
            let mut device = cloud.clone();
            if let Some(pos) = discovered
                .iter()
                .position(|s| s.name.eq_ignore_ascii_case(&device.display_name))
            {
                matched[pos] = true;
                device.brand = DeviceBrand::LocalProtocol;
                device.local_address = Some(discovered[pos].address.clone());
            }
            devices.push(device);
        }

        for (speaker, _) in discovered.iter().zip(&matched).filter(|(_, m)| !**m) {
            devices.push(DeviceRef {
                id: format!("{}{}", LOCAL_ONLY_ID_PREFIX, speaker.name),
                display_name: speaker.name.clone(),
                brand: DeviceBrand::LocalProtocol,
                volume_percent: 0,
                is_active: false,
                supports_volume: true,
                local_address: Some(speaker.address.clone()),
            });
        }

        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for device in devices.into_iter().filter(|d| !is_hidden(d)) {
            by_name
                .entry(device.display_name.to_lowercase())
                .or_insert_with(|| device.clone());
            by_id.entry(device.id.clone()).or_insert(device);
        }

        Self {
            by_name,
            by_id,
            cloud_devices,
            last_refreshed_at,
        }
    }

    /// Name (case-insensitive) first, then id.
    pub fn lookup(&self, name_or_id: &str) -> Option<DeviceRef> {
        self.by_name
            .get(&name_or_id.to_lowercase())
            .or_else(|| self.by_id.get(name_or_id))
            .cloned()
    }

    /// All devices, sorted by display name.
    pub fn devices(&self) -> Vec<DeviceRef> {
        let mut devices: Vec<DeviceRef> = self.by_id.values().cloned().collect();
        devices.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        devices
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at
    }
}

/// Last-known controllable render targets.
pub struct DeviceCache {
    index: RwLock<Arc<DeviceIndex>>,
    discovered: RwLock<Vec<DiscoveredSpeaker>>,
    default_device: Option<String>,
    hidden: Vec<String>,
    max_age: Duration,
    bus: SharedBus,
}

impl DeviceCache {
    pub fn new(
        default_device: Option<String>,
        hidden: Vec<String>,
        max_age: Duration,
        bus: SharedBus,
    ) -> Self {
        Self {
            index: RwLock::new(Arc::new(DeviceIndex::default())),
            discovered: RwLock::new(Vec::new()),
            default_device,
            hidden,
            max_age,
            bus,
        }
    }

    /// Current generation of the device list.
    pub async fn index(&self) -> Arc<DeviceIndex> {
        self.index.read().await.clone()
    }

    /// Resolve a display name or backend id. The `"*"` wildcard resolves to
    /// the configured default device, or `None` (the cloud's active device).
    pub async fn resolve(&self, name_or_id: &str) -> Option<DeviceRef> {
        let key = name_or_id.trim();
        let index = self.index().await;
        if key == DEFAULT_DEVICE_WILDCARD {
            return self
                .default_device
                .as_deref()
                .and_then(|name| index.lookup(name));
        }
        index.lookup(key)
    }

    pub fn default_device(&self) -> Option<&str> {
        self.default_device.as_deref()
    }

    /// Whether the cache has never been filled or is older than the max age.
    pub async fn is_stale(&self) -> bool {
        match self.index().await.last_refreshed_at() {
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map(|age| age > self.max_age).unwrap_or(false)
            }
            None => true,
        }
    }

    /// Refresh from the cloud backend. Without `force` this is a no-op while
    /// the cache is fresh. Returns whether the backend was queried.
    pub async fn refresh(&self, cloud: &dyn CloudBackend, force: bool) -> Result<bool, BackendError> {
        if !force && !self.is_stale().await {
            return Ok(false);
        }
        let devices = cloud.get_devices(force).await?;
        self.replace_cloud_devices(devices).await;
        Ok(true)
    }

    /// Install a new cloud device list, replacing the whole index.
    pub async fn replace_cloud_devices(&self, devices: Vec<DeviceRef>) {
        let count = {
            // Lock order is index, then discovered
            let mut index = self.index.write().await;
            let discovered = self.discovered.read().await;
            let next = DeviceIndex::build(devices, &discovered, &self.hidden, Some(Utc::now()));
            let count = next.len();
            *index = Arc::new(next);
            count
        };
        debug!("Device cache replaced: {} devices", count);
        self.bus.publish(BusEvent::DevicesRefreshed { count });
    }

    /// Replace the locally-discovered speaker list and rebuild the index
    /// from the last cloud list.
    pub async fn update_discovered(&self, speakers: Vec<DiscoveredSpeaker>) {
        let mut index = self.index.write().await;
        *self.discovered.write().await = speakers.clone();
        let next = DeviceIndex::build(
            index.cloud_devices.clone(),
            &speakers,
            &self.hidden,
            index.last_refreshed_at,
        );
        debug!("Device cache rebuilt for {} discovered speakers", speakers.len());
        *index = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    fn local_device(name: &str, address: &str) -> DeviceRef {
        DeviceRef {
            brand: DeviceBrand::LocalProtocol,
            local_address: Some(address.to_string()),
            ..DeviceRef::cloud(format!("id-{}", name), name)
        }
    }

    fn cache() -> DeviceCache {
        DeviceCache::new(
            Some("Kitchen".to_string()),
            vec!["Hidden TV".to_string()],
            Duration::from_secs(300),
            create_bus(),
        )
    }

    #[test]
    fn test_select_backend_scenario() {
        let kitchen = DeviceRef::cloud("k1", "Kitchen");
        let den = local_device("Den", "10.0.0.5");

        assert_eq!(select_backend(&den), Backend::LocalProtocol);
        assert_eq!(select_backend(&kitchen), Backend::Cloud);
        assert_eq!(select_target(None).backend(), Backend::Cloud);
    }

    #[test]
    fn test_select_backend_requires_usable_address() {
        let mut den = local_device("Den", "not a host/at all");
        assert_eq!(select_backend(&den), Backend::Cloud);

        den.local_address = None;
        assert_eq!(select_backend(&den), Backend::Cloud);

        let mut generic_with_address = DeviceRef::cloud("x", "Office");
        generic_with_address.local_address = Some("10.0.0.9".to_string());
        assert_eq!(select_backend(&generic_with_address), Backend::Cloud);
    }

    #[test]
    fn test_local_address_parsing() {
        let addr = LocalAddress::parse("10.0.0.5").unwrap();
        assert_eq!(addr.host(), "10.0.0.5");
        assert_eq!(addr.port(), LOCAL_PROTOCOL_PORT);

        let addr = LocalAddress::parse("den.local:1443").unwrap();
        assert_eq!(addr.to_string(), "den.local:1443");

        assert!(LocalAddress::parse("").is_none());
        assert!(LocalAddress::parse("10.0.0.5/status").is_none());
        assert!(LocalAddress::parse("user@10.0.0.5").is_none());
    }

    #[test]
    fn test_resolve_relative_artwork() {
        let addr = LocalAddress::parse("10.0.0.5").unwrap();
        assert_eq!(
            addr.resolve_url("/getaa?s=1&u=abc").as_deref(),
            Some("http://10.0.0.5:1400/getaa?s=1&u=abc")
        );
        assert_eq!(
            addr.resolve_url("https://i.scdn.co/image/ab67").as_deref(),
            Some("https://i.scdn.co/image/ab67")
        );
    }

    #[tokio::test]
    async fn test_resolve_by_name_then_id() {
        let cache = cache();
        cache
            .replace_cloud_devices(vec![
                DeviceRef::cloud("k1", "Kitchen"),
                DeviceRef::cloud("o1", "Office"),
            ])
            .await;

        assert_eq!(cache.resolve("kitchen").await.unwrap().id, "k1");
        assert_eq!(cache.resolve("o1").await.unwrap().display_name, "Office");
        assert!(cache.resolve("Unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_wildcard_resolves_default_device() {
        let cache = cache();
        assert!(cache.resolve("*").await.is_none());

        cache
            .replace_cloud_devices(vec![DeviceRef::cloud("k1", "Kitchen")])
            .await;
        assert_eq!(cache.resolve("*").await.unwrap().id, "k1");
    }

    #[tokio::test]
    async fn test_hidden_devices_are_excluded() {
        let cache = cache();
        cache
            .replace_cloud_devices(vec![
                DeviceRef::cloud("tv", "hidden tv"),
                DeviceRef::cloud("k1", "Kitchen"),
            ])
            .await;

        assert!(cache.resolve("Hidden TV").await.is_none());
        assert!(cache.resolve("tv").await.is_none());
        assert_eq!(cache.index().await.len(), 1);
    }

    #[tokio::test]
    async fn test_discovered_speakers_merge_with_cloud_list() {
        let cache = cache();
        cache
            .update_discovered(vec![
                DiscoveredSpeaker {
                    name: "Den".to_string(),
                    address: "10.0.0.5".to_string(),
                },
                DiscoveredSpeaker {
                    name: "Patio".to_string(),
                    address: "10.0.0.6".to_string(),
                },
            ])
            .await;
        cache
            .replace_cloud_devices(vec![
                DeviceRef::cloud("k1", "Kitchen"),
                DeviceRef::cloud("d1", "Den"),
            ])
            .await;

        let den = cache.resolve("Den").await.unwrap();
        assert_eq!(den.id, "d1");
        assert_eq!(den.brand, DeviceBrand::LocalProtocol);
        assert_eq!(select_backend(&den), Backend::LocalProtocol);

        let patio = cache.resolve("Patio").await.unwrap();
        assert!(patio.is_local_only());
        assert_eq!(patio.local_address.as_deref(), Some("10.0.0.6"));

        let kitchen = cache.resolve("Kitchen").await.unwrap();
        assert_eq!(select_backend(&kitchen), Backend::Cloud);
    }

    #[tokio::test]
    async fn test_new_cache_is_stale_until_filled() {
        let cache = cache();
        assert!(cache.is_stale().await);
        cache.replace_cloud_devices(vec![]).await;
        assert!(!cache.is_stale().await);
    }
}
