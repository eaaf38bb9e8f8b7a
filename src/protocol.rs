//! Wire types shared between the backend, the push channel and the
//! provider boundary.
//!
//! The backend speaks camelCase JSON; every type here mirrors one of its
//! payloads. [`NowPlaying`] doubles as the in-memory record held by the
//! [`store`](crate::store) since the store replaces it wholesale from push
//! frames anyway.

use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parses and logs a JSON payload.
///
/// Successful parses are logged at TRACE level. On failure the raw body is
/// logged so protocol drift can be diagnosed from the device.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing payload ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}

/// Origin of the current record, deciding who governs transport state.
///
/// With [`Local`](Self::Local) the crossfade engine drives the audio
/// channels from `streamUrl`; with [`External`](Self::External) the
/// streaming provider is authoritative and `streamUrl` is absent.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Local,
    #[serde(rename = "spotify")]
    External,
}

/// The canonical now-playing record.
///
/// Owned exclusively by the store and either replaced wholesale (push
/// frames, initial fetch) or shallow-patched ([`StatePatch`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NowPlaying {
    pub artist: String,
    pub track: String,
    /// Not served by every backend version.
    pub album: Option<String>,
    pub country: String,
    pub decade: String,
    /// Absolute or server-relative; empty means the placeholder asset.
    pub cover_url: String,
    /// Absolute or server-relative URL for the local playback channel.
    /// Absent (or empty, as older backends send) when playback is fully
    /// delegated to the external provider.
    pub stream_url: Option<String>,
    /// Identity key for like persistence.
    pub track_id: String,
    /// Identity key for provider playback.
    pub track_uri: Option<String>,
    pub liked: bool,
    pub source: Source,
}

impl NowPlaying {
    /// The deterministic offline record installed when the initial fetch
    /// fails, so the UI never needs a separate error branch.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            artist: "—".to_owned(),
            track: "Backend offline".to_owned(),
            album: None,
            country: "—".to_owned(),
            decade: "—".to_owned(),
            cover_url: String::new(),
            stream_url: None,
            track_id: "offline".to_owned(),
            track_uri: None,
            liked: false,
            source: Source::Local,
        }
    }

    /// Returns the local stream URL, treating the empty string the same as
    /// absent.
    #[must_use]
    pub fn local_stream(&self) -> Option<&str> {
        self.stream_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Whether this is the offline placeholder rather than a real track.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.track_id == "offline"
    }
}

/// Shallow partial update of a [`NowPlaying`] record.
///
/// `None` fields are left untouched on merge and skipped on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl StatePatch {
    /// Convenience patch flipping only the liked flag.
    #[must_use]
    pub fn liked(liked: bool) -> Self {
        Self {
            liked: Some(liked),
            ..Self::default()
        }
    }

    /// Applies this patch to a record in place.
    pub fn apply(&self, record: &mut NowPlaying) {
        let Self {
            artist,
            track,
            album,
            country,
            decade,
            cover_url,
            stream_url,
            track_id,
            track_uri,
            liked,
            source,
        } = self.clone();

        if let Some(artist) = artist {
            record.artist = artist;
        }
        if let Some(track) = track {
            record.track = track;
        }
        if album.is_some() {
            record.album = album;
        }
        if let Some(country) = country {
            record.country = country;
        }
        if let Some(decade) = decade {
            record.decade = decade;
        }
        if let Some(cover_url) = cover_url {
            record.cover_url = cover_url;
        }
        if stream_url.is_some() {
            record.stream_url = stream_url;
        }
        if let Some(track_id) = track_id {
            record.track_id = track_id;
        }
        if track_uri.is_some() {
            record.track_uri = track_uri;
        }
        if let Some(liked) = liked {
            record.liked = liked;
        }
        if let Some(source) = source {
            record.source = source;
        }
    }
}

/// One frame on the push channel.
///
/// The backend only ever sends full snapshots; any `type` other than
/// `"state"` is ignored by the adapter.
#[derive(Clone, Debug, Deserialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub state: Option<NowPlaying>,
}

impl PushFrame {
    pub const STATE: &'static str = "state";
}

/// Body of the like persistence call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub track_id: String,
    pub liked: bool,
    pub track_uri: Option<String>,
}

/// Transport state as reported by the external provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct PlaybackUpdate {
    pub paused: bool,
    /// Position within the current track.
    #[serde(with = "millis")]
    pub position: Duration,
    #[serde(with = "millis")]
    pub duration: Duration,
}

/// Serde adapter for millisecond integers on the provider boundary.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_backend_field_names() {
        let body = r#"{
            "artist": "Fela Kuti",
            "track": "Water No Get Enemy",
            "country": "Nigeria",
            "decade": "1970s",
            "coverUrl": "/api/cover/x.jpg",
            "trackId": "fela-water-no-get-enemy",
            "source": "local",
            "streamUrl": "",
            "liked": false
        }"#;

        let record: NowPlaying = json(body, "test").unwrap();
        assert_eq!(record.artist, "Fela Kuti");
        assert_eq!(record.source, Source::Local);
        assert_eq!(record.local_stream(), None);
        assert_eq!(record.track_uri, None);
    }

    #[test]
    fn external_source_clears_local_authority() {
        let body = r#"{"source": "spotify", "trackUri": "spotify:track:123"}"#;
        let record: NowPlaying = json(body, "test").unwrap();
        assert_eq!(record.source, Source::External);
        assert_eq!(record.track_uri.as_deref(), Some("spotify:track:123"));
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut record = NowPlaying::offline();
        let patch: StatePatch =
            json(r#"{"liked": true, "country": "France"}"#, "test").unwrap();
        patch.apply(&mut record);

        assert!(record.liked);
        assert_eq!(record.country, "France");
        assert_eq!(record.track, "Backend offline");
    }

    #[test]
    fn patch_skips_absent_fields_on_the_wire() {
        let body = serde_json::to_string(&StatePatch::liked(true)).unwrap();
        assert_eq!(body, r#"{"liked":true}"#);
    }

    #[test]
    fn non_state_frames_carry_no_record() {
        let frame: PushFrame = json(r#"{"type": "ping"}"#, "test").unwrap();
        assert_eq!(frame.frame_type, "ping");
        assert!(frame.state.is_none());
    }

    #[test]
    fn offline_record_is_deterministic() {
        let record = NowPlaying::offline();
        assert_eq!(record.track, "Backend offline");
        assert!(!record.liked);
        assert_eq!(record.track_id, "offline");
    }
}
