//! Command layer.
//!
//! Everything a physical control on the device can do funnels through
//! [`Controls`]: like toggling with optimistic rollback, transport commands
//! routed to whichever party currently governs playback, and the
//! hardware-simulation patches used on the bench.
//!
//! Nothing here is fatal. Commands that cannot be honored right now (no
//! record yet, provider not ready) log and return; failed persistence rolls
//! the visible state back.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    engine::EngineHandle,
    gateway::NowPlayingApi,
    protocol::{LikeRequest, PlaybackUpdate, Source, StatePatch},
    provider::{PlayerApi, Provider},
    store::Store,
};

/// Country list of the globe control, in rotation order.
pub const COUNTRIES: [&str; 7] = [
    "Nigeria", "France", "Brazil", "Japan", "USA", "Mexico", "Ghana",
];

/// Decade list of the dial control, in rotation order.
pub const DECADES: [&str; 7] = [
    "1950s", "1960s", "1970s", "1980s", "1990s", "2000s", "2010s",
];

/// Rotation direction of a physical selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

/// Steps through `list` from `current`, wrapping at both ends. An unknown
/// current value steps from the start of the list.
fn cycle<'a>(list: &[&'a str], current: &str, direction: Direction) -> &'a str {
    let len = list.len();
    let index = list.iter().position(|item| *item == current).unwrap_or(0);
    let index = match direction {
        Direction::Next => (index + 1) % len,
        Direction::Previous => (index + len - 1) % len,
    };
    list[index]
}

/// Device command surface.
pub struct Controls<A, P> {
    store: Arc<Store<A>>,
    api: Arc<A>,
    provider: Arc<Provider<P>>,
    engine: EngineHandle,
}

impl<A, P> Controls<A, P>
where
    A: NowPlayingApi + Send + Sync + 'static,
    P: PlayerApi,
{
    pub fn new(
        store: Arc<Store<A>>,
        api: Arc<A>,
        provider: Arc<Provider<P>>,
        engine: EngineHandle,
    ) -> Self {
        Self {
            store,
            api,
            provider,
            engine,
        }
    }

    /// Flips the liked flag optimistically and persists it.
    ///
    /// The store is patched before the network call so the LED follows the
    /// button press; a failed persistence call patches the original value
    /// back, making failure visible as a revert.
    pub async fn toggle_like(&self) {
        let Some(record) = self.store.get() else {
            debug!("like ignored: no record yet");
            return;
        };
        if record.is_offline() {
            debug!("like ignored: offline placeholder");
            return;
        }

        let liked = !record.liked;
        self.store.patch(&StatePatch::liked(liked));

        let request = LikeRequest {
            track_id: record.track_id.clone(),
            liked,
            track_uri: record.track_uri.clone(),
        };
        if let Err(e) = self.api.post_like(request).await {
            warn!("like for {} failed, rolling back: {e}", record.track_id);
            self.store.patch(&StatePatch::liked(record.liked));
        }
    }

    pub async fn skip_next(&self) {
        if !self.provider.is_ready() {
            debug!("skip ignored: provider not ready");
            return;
        }
        if let Err(e) = self.provider.next().await {
            warn!("skip next failed: {e}");
        }
    }

    pub async fn skip_previous(&self) {
        if !self.provider.is_ready() {
            debug!("skip ignored: provider not ready");
            return;
        }
        if let Err(e) = self.provider.previous().await {
            warn!("skip previous failed: {e}");
        }
    }

    /// Toggles the transport of whichever party currently governs it.
    pub async fn play_pause(&self) {
        let source = self.store.get().map(|record| record.source);
        let playback = self.engine.playback();

        match source {
            Some(Source::Local) => self.engine.set_paused(playback.playing),
            Some(Source::External) => {
                if !self.provider.is_ready() {
                    debug!("play/pause ignored: provider not ready");
                    return;
                }
                let result = if playback.playing {
                    self.provider.pause().await
                } else {
                    self.provider.resume().await
                };
                match result {
                    // Optimistic flip; the next provider report corrects it
                    // if the command was lost.
                    Ok(()) => self.engine.provider_state(PlaybackUpdate {
                        paused: playback.playing,
                        position: playback.position,
                        duration: playback.duration.unwrap_or_default(),
                    }),
                    Err(e) => warn!("play/pause failed: {e}"),
                }
            }
            None => debug!("play/pause ignored: no record yet"),
        }
    }

    pub async fn seek(&self, position: Duration) {
        if !self.provider.is_ready() {
            debug!("seek ignored: provider not ready");
            return;
        }
        if let Err(e) = self.provider.seek(position).await {
            warn!("seek failed: {e}");
        }
    }

    /// Steps the globe control one country in `direction`.
    pub async fn cycle_country(&self, direction: Direction) {
        let Some(record) = self.store.get() else {
            return;
        };
        let country = cycle(&COUNTRIES, &record.country, direction).to_owned();
        self.simulate(StatePatch {
            country: Some(country),
            ..StatePatch::default()
        })
        .await;
    }

    /// Steps the dial control one decade in `direction`.
    pub async fn cycle_decade(&self, direction: Direction) {
        let Some(record) = self.store.get() else {
            return;
        };
        let decade = cycle(&DECADES, &record.decade, direction).to_owned();
        self.simulate(StatePatch {
            decade: Some(decade),
            ..StatePatch::default()
        })
        .await;
    }

    /// Loads the bench-test preset record.
    pub async fn preset(&self) {
        self.simulate(StatePatch {
            artist: Some("Georges Brassens".to_owned()),
            track: Some("Les copains d'abord".to_owned()),
            country: Some("France".to_owned()),
            decade: Some("1960s".to_owned()),
            track_id: Some("brassens-copains-1960".to_owned()),
            cover_url: Some(
                "https://upload.wikimedia.org/wikipedia/en/9/9b/Georges_Brassens.jpg".to_owned(),
            ),
            ..StatePatch::default()
        })
        .await;
    }

    /// Applies a hardware-simulation patch locally and forwards it to the
    /// dev endpoint.
    ///
    /// No rollback: the backend echoes accepted patches over the push
    /// channel, so the authoritative state self-corrects either way.
    pub async fn simulate(&self, patch: StatePatch) {
        self.store.patch(&patch);
        if let Err(e) = self.api.dev_patch(patch).await {
            warn!("dev patch rejected: {e}");
        }
    }
}
