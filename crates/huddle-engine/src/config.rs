//! Router and transport configuration.

use std::net::{IpAddr, Ipv4Addr};

use huddle_protocol::MediaKind;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// A codec a router is willing to route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    /// e.g. `audio/opus`, `video/VP8`.
    pub mime_type: String,
    pub clock_rate: u32,
    /// Audio channel count. `None` for video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
}

impl RtpCodecCapability {
    /// Opus, 48 kHz stereo.
    pub fn opus() -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".into(),
            clock_rate: 48_000,
            channels: Some(2),
        }
    }

    /// VP8, 90 kHz.
    pub fn vp8() -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: "video/VP8".into(),
            clock_rate: 90_000,
            channels: None,
        }
    }
}

/// Settings for the router every room creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            media_codecs: vec![
                RtpCodecCapability::opus(),
                RtpCodecCapability::vp8(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// TransportOptions
// ---------------------------------------------------------------------------

/// Settings for every WebRTC transport a session creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    /// Local address the media worker binds to.
    pub listen_ip: IpAddr,

    /// Address advertised in ICE candidates, when the listen address is
    /// not reachable by clients (NAT, containers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,

    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,

    /// Bits per second the transport starts sending at.
    pub initial_available_outgoing_bitrate: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announced_ip: None,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            initial_available_outgoing_bitrate: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_default_has_opus_and_vp8() {
        let config = RouterConfig::default();
        assert_eq!(config.media_codecs.len(), 2);
        assert_eq!(config.media_codecs[0].mime_type, "audio/opus");
        assert_eq!(config.media_codecs[0].clock_rate, 48_000);
        assert_eq!(config.media_codecs[0].channels, Some(2));
        assert_eq!(config.media_codecs[1].kind, MediaKind::Video);
        assert_eq!(config.media_codecs[1].clock_rate, 90_000);
    }

    #[test]
    fn test_transport_options_default() {
        let options = TransportOptions::default();
        assert!(options.enable_udp && options.enable_tcp && options.prefer_udp);
        assert_eq!(options.initial_available_outgoing_bitrate, 1_000_000);
        assert_eq!(options.announced_ip, None);
    }

    #[test]
    fn test_codec_capability_skips_missing_channels() {
        let json = serde_json::to_value(RtpCodecCapability::vp8()).unwrap();
        assert_eq!(json["mimeType"], "video/VP8");
        assert!(json.get("channels").is_none());
    }
}
