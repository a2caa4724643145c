//! Parsing helpers for local-speaker metadata and catalog identities.
//!
//! Local speakers report cloud content through transport URIs such as
//! `x-sonos-spotify:spotify%3atrack%3a3n3Ppam7vgaVa1iaRUc9Lp?sid=9&flags=8224`
//! and DIDL-Lite documents; these helpers recover the catalog URI, the
//! `h:mm:ss` positions and the tag values the resolver needs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::PlayerError;
use crate::model::ItemKind;

/// URI scheme of the streaming catalog.
pub const CATALOG_SCHEME: &str = "spotify";

const CATALOG_WEB_HOST: &str = "open.spotify.com";

// =============================================================================
// CatalogUri
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Track,
    Episode,
    Album,
    Playlist,
    Show,
    Artist,
}

impl CatalogKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "track" => Some(Self::Track),
            "episode" => Some(Self::Episode),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            "show" => Some(Self::Show),
            "artist" => Some(Self::Artist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Episode => "episode",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Show => "show",
            Self::Artist => "artist",
        }
    }

    /// Album, playlist, show or artist: a grouping rather than a playable item.
    pub fn is_context(&self) -> bool {
        !matches!(self, Self::Track | Self::Episode)
    }

    pub fn item_kind(&self) -> ItemKind {
        match self {
            Self::Track => ItemKind::Track,
            Self::Episode => ItemKind::Episode,
            _ => ItemKind::Unknown,
        }
    }
}

/// A `spotify:<kind>:<id>` catalog identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CatalogUri {
    pub kind: CatalogKind,
    pub id: String,
}

impl CatalogUri {
    pub fn new(kind: CatalogKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn is_context(&self) -> bool {
        self.kind.is_context()
    }
}

impl fmt::Display for CatalogUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", CATALOG_SCHEME, self.kind.as_str(), self.id)
    }
}

impl FromStr for CatalogUri {
    type Err = PlayerError;

    /// Accepts `spotify:<kind>:<id>`, the legacy
    /// `spotify:user:<user>:playlist:<id>` form and
    /// `https://open.spotify.com/<kind>/<id>` share links.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PlayerError::InvalidArgument(format!("not a catalog URI: {:?}", s));

        if s.starts_with("http://") || s.starts_with("https://") {
            let url = url::Url::parse(s).map_err(|_| invalid())?;
            if url.host_str() != Some(CATALOG_WEB_HOST) {
                return Err(invalid());
            }
            // Localized links carry a leading `intl-xx` segment
            let segments: Vec<&str> = url
                .path_segments()
                .map(|segs| segs.filter(|seg| !seg.is_empty()).collect())
                .unwrap_or_default();
            let segments: Vec<&str> = match segments.first() {
                Some(first) if first.starts_with("intl-") => segments[1..].to_vec(),
                _ => segments,
            };
            return match segments.as_slice() {
                [kind, id] if is_catalog_id(id) => CatalogKind::parse(kind)
                    .map(|kind| Self::new(kind, *id))
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            };
        }

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [scheme, kind, id] if *scheme == CATALOG_SCHEME && is_catalog_id(id) => {
                CatalogKind::parse(kind)
                    .map(|kind| Self::new(kind, *id))
                    .ok_or_else(invalid)
            }
            [scheme, "user", _, "playlist", id] if *scheme == CATALOG_SCHEME && is_catalog_id(id) => {
                Ok(Self::new(CatalogKind::Playlist, *id))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for CatalogUri {
    type Error = PlayerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CatalogUri> for String {
    fn from(uri: CatalogUri) -> Self {
        uri.to_string()
    }
}

fn is_catalog_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

fn embedded_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"spotify:(track|episode|album|playlist|show|artist):([A-Za-z0-9]+)")
            .expect("catalog URI pattern is valid")
    })
}

/// Pull the catalog URI out of a vendor transport URI or metadata blob.
///
/// Handles percent-encoded payloads, vendor prefixes
/// (`x-sonos-spotify:`, `x-rincon-cpcontainer:1004206c`) and query suffixes.
pub fn extract_catalog_uri(raw: &str) -> Option<CatalogUri> {
    let decoded = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
    let caps = embedded_uri_regex().captures(&decoded)?;
    let kind = CatalogKind::parse(caps.get(1)?.as_str())?;
    Some(CatalogUri::new(kind, caps.get(2)?.as_str()))
}

// =============================================================================
// h:mm:ss positions
// =============================================================================

/// Parse an `h:mm:ss` (or `mm:ss`, optionally with fractional seconds)
/// position into milliseconds. `NOT_IMPLEMENTED` and empty values are `None`.
pub fn parse_hms(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return None;
    }

    let parts: Vec<&str> = value.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    let seconds: f64 = seconds.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_mul(1000)?
        .checked_add((seconds * 1000.0).round() as u64)
}

/// Format milliseconds as `h:mm:ss` for local-protocol seeks.
pub fn format_hms(ms: u64) -> String {
    let total = ms / 1000;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

// =============================================================================
// DIDL-Lite
// =============================================================================

/// Tag values recovered from a DIDL-Lite item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DidlItem {
    pub title: Option<String>,
    pub creator: Option<String>,
    pub album: Option<String>,
    /// Show name for podcast episodes (`r:podcast`)
    pub show: Option<String>,
    pub album_art_uri: Option<String>,
    pub item_class: Option<String>,
    pub res_uri: Option<String>,
    pub duration_ms: Option<u64>,
}

impl DidlItem {
    pub fn is_episode(&self) -> bool {
        self.show.is_some()
            || self
                .item_class
                .as_deref()
                .map(|class| class.contains("podcast") || class.contains("episode"))
                .unwrap_or(false)
    }
}

/// Parse a DIDL-Lite document, escaped or not.
pub fn parse_didl(raw: &str) -> Option<DidlItem> {
    let xml: Cow<str> = if raw.contains("&lt;DIDL-Lite") {
        quick_xml::escape::unescape(raw).ok()?
    } else {
        Cow::Borrowed(raw)
    };
    if !xml.contains("DIDL-Lite") {
        return None;
    }

    let res_tag = extract_open_tag(&xml, "res");
    Some(DidlItem {
        title: extract_xml_value(&xml, "title"),
        creator: extract_xml_value(&xml, "creator"),
        album: extract_xml_value(&xml, "album"),
        show: extract_xml_value(&xml, "podcast"),
        album_art_uri: extract_xml_value(&xml, "albumArtURI"),
        item_class: extract_xml_value(&xml, "class"),
        res_uri: extract_xml_value(&xml, "res"),
        duration_ms: res_tag
            .as_deref()
            .and_then(|tag| extract_attribute(tag, "duration"))
            .and_then(|d| parse_hms(&d)),
    })
}

/// Extract XML value, handling optional namespace prefixes (e.g., <dc:title> or <title>).
/// Entity references in the value are decoded.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(
        r"<(?:[^:>/\s]+:)?{}\b[^>]*>([^<]*)</(?:[^:>/\s]+:)?{}>",
        regex::escape(tag),
        regex::escape(tag)
    );

    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(xml).and_then(|caps| caps.get(1))?.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some(
        quick_xml::escape::unescape(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string()),
    )
}

fn extract_open_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<(?:[^:>/\s]+:)?{}\b[^>]*>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.find(xml).map(|m| m.as_str().to_string())
}

fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"\b{}="([^"]*)""#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPISODE_DIDL: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item id="-1" parentID="-1" restricted="true"><res protocolInfo="sonos.com-spotify:*:audio/x-spotify:*" duration="0:52:10">x-sonosapi-hls:spotify%3aepisode%3a4rOoJ6Egrf8K2IrywzwOMk?sid=9&amp;flags=8232</res><upnp:albumArtURI>/getaa?s=1&amp;u=x-sonosapi-hls%3aspotify</upnp:albumArtURI><dc:title>Episode 42: Rust &amp; Friends</dc:title><upnp:class>object.item.audioItem.podcast</upnp:class><r:podcast>Systems Talk</r:podcast></item></DIDL-Lite>"#;

    #[test]
    fn test_extract_catalog_uri_from_sonos_transport_uri() {
        let uri = extract_catalog_uri(
            "x-sonos-spotify:spotify%3atrack%3a3n3Ppam7vgaVa1iaRUc9Lp?sid=9&flags=8224&sn=7",
        )
        .unwrap();
        assert_eq!(uri.kind, CatalogKind::Track);
        assert_eq!(uri.to_string(), "spotify:track:3n3Ppam7vgaVa1iaRUc9Lp");
    }

    #[test]
    fn test_extract_catalog_uri_from_container() {
        let uri =
            extract_catalog_uri("x-rincon-cpcontainer:1004206cspotify%3aalbum%3a1DFixLWuPkv3KT3TnV35m3")
                .unwrap();
        assert_eq!(uri.kind, CatalogKind::Album);
        assert_eq!(uri.id, "1DFixLWuPkv3KT3TnV35m3");
    }

    #[test]
    fn test_extract_catalog_uri_without_identity() {
        assert!(extract_catalog_uri("x-rincon-stream:RINCON_000E58A0B1C201400").is_none());
        assert!(extract_catalog_uri("").is_none());
    }

    #[test]
    fn test_catalog_uri_parsing() {
        let uri: CatalogUri = "spotify:artist:0OdUWJ0sBjDrqHygGUXeCF".parse().unwrap();
        assert_eq!(uri.kind, CatalogKind::Artist);
        assert!(uri.is_context());

        let uri: CatalogUri = "spotify:user:someone:playlist:37i9dQZF1DXcBWIGoYBM5M"
            .parse()
            .unwrap();
        assert_eq!(uri.kind, CatalogKind::Playlist);

        let uri: CatalogUri = "https://open.spotify.com/intl-de/episode/4rOoJ6Egrf8K2IrywzwOMk?si=x"
            .parse()
            .unwrap();
        assert_eq!(uri.to_string(), "spotify:episode:4rOoJ6Egrf8K2IrywzwOMk");

        assert!("spotify:planet:abc".parse::<CatalogUri>().is_err());
        assert!("https://example.com/track/abc".parse::<CatalogUri>().is_err());
        assert!("spotify:track:".parse::<CatalogUri>().is_err());
    }

    #[test]
    fn test_hms_parsing() {
        assert_eq!(parse_hms("0:03:25"), Some(205_000));
        assert_eq!(parse_hms("1:00:00"), Some(3_600_000));
        assert_eq!(parse_hms("03:25"), Some(205_000));
        assert_eq!(parse_hms("0:00:01.500"), Some(1_500));
        assert_eq!(parse_hms("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_hms(""), None);
        assert_eq!(parse_hms("abc"), None);
    }

    #[test]
    fn test_hms_out_of_range_is_rejected() {
        assert_eq!(parse_hms("99999999999999999:00:00"), None);
        assert_eq!(parse_hms("0:999999999999999999:00"), None);
        assert_eq!(parse_hms("5124095576031:00:00"), None);
        assert_eq!(parse_hms("5124095576:00:00"), Some(18_446_744_073_600_000));
    }

    #[test]
    fn test_hms_formatting() {
        assert_eq!(format_hms(205_000), "0:03:25");
        assert_eq!(format_hms(3_723_999), "1:02:03");
        assert_eq!(format_hms(0), "0:00:00");
    }

    #[test]
    fn test_parse_didl_episode() {
        let item = parse_didl(EPISODE_DIDL).unwrap();
        assert_eq!(item.title.as_deref(), Some("Episode 42: Rust & Friends"));
        assert_eq!(item.show.as_deref(), Some("Systems Talk"));
        assert_eq!(item.duration_ms, Some(3_130_000));
        assert!(item.is_episode());
        assert_eq!(
            item.album_art_uri.as_deref(),
            Some("/getaa?s=1&u=x-sonosapi-hls%3aspotify")
        );
        let uri = item.res_uri.as_deref().and_then(extract_catalog_uri).unwrap();
        assert_eq!(uri.kind, CatalogKind::Episode);
    }

    #[test]
    fn test_parse_escaped_didl() {
        let escaped = EPISODE_DIDL
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;");
        let item = parse_didl(&escaped).unwrap();
        assert_eq!(item.show.as_deref(), Some("Systems Talk"));
    }

    #[test]
    fn test_parse_didl_rejects_non_didl() {
        assert!(parse_didl("NOT_IMPLEMENTED").is_none());
    }
}
