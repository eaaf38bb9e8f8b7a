//! Audio playback channels.
//!
//! A channel is one decode-and-output lane: a rodio sink fed by a
//! progressively downloaded HTTP stream. The crossfade engine owns exactly
//! two of them and plays them simultaneously during a fade, so everything
//! here is per-channel state with no knowledge of the other lane.
//!
//! The rodio `OutputStream` itself is not `Send` and stays on the main
//! thread; channels only hold the `Sink`, which is safe to move into the
//! engine task.

use std::future::Future;
use std::time::Duration;

use rodio::{Decoder, OutputStreamHandle, Sink, Source};
use stream_download::{
    http::HttpStream, storage::temp::TempStorageProvider, Settings, StreamDownload,
};
use url::Url;

use crate::error::{Error, Result};

/// One playback lane of the crossfade engine.
///
/// A trait so the engine's timing logic can be driven against a fake
/// without an audio device; production code uses [`RodioChannel`].
pub trait AudioChannel: Send {
    /// Replaces the channel's source, leaving it paused at the start.
    fn load(&mut self, url: Url) -> impl Future<Output = Result<()>> + Send;

    /// Starts or resumes playback of the loaded source.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    /// Drops the source and silences the channel.
    fn stop(&mut self);

    /// Sets the channel volume, clamped to [0, 1].
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Whether the channel is actually producing audio right now.
    fn is_playing(&self) -> bool;

    /// The currently loaded source, if any.
    fn source(&self) -> Option<Url>;

    /// Playback position within the current source.
    fn position(&self) -> Duration;

    /// Total length of the current source, when the decoder knows it.
    /// Live streams never report one.
    fn duration(&self) -> Option<Duration>;

    /// Returns `true` exactly once after the loaded source plays to its
    /// natural end. Stopping or replacing the source never reports an end.
    fn take_ended(&mut self) -> bool;
}

/// Production [`AudioChannel`] backed by a rodio sink.
pub struct RodioChannel {
    /// Short label for logs, to tell the two lanes apart.
    label: &'static str,
    sink: Sink,
    client: reqwest::Client,
    source: Option<Url>,
    duration: Option<Duration>,
}

impl RodioChannel {
    /// Bytes buffered before playback may start.
    ///
    /// Matches roughly a second of a typical stream; enough to ride out
    /// jitter without delaying the fade noticeably.
    const PREFETCH_BYTES: u64 = 64 * 1024;

    pub fn new(
        label: &'static str,
        handle: &OutputStreamHandle,
        client: reqwest::Client,
    ) -> Result<Self> {
        let sink = Sink::try_new(handle)?;
        sink.pause();
        Ok(Self {
            label,
            sink,
            client,
            source: None,
            duration: None,
        })
    }
}

impl AudioChannel for RodioChannel {
    async fn load(&mut self, url: Url) -> Result<()> {
        let stream = HttpStream::new(self.client.clone(), url.clone()).await?;
        let download = StreamDownload::from_stream(
            stream,
            TempStorageProvider::default(),
            Settings::default().prefetch_bytes(Self::PREFETCH_BYTES),
        )
        .await?;
        let decoder = Decoder::new(download)?;
        let duration = decoder.total_duration();

        // `clear` also pauses, so the new source waits for `play`.
        self.sink.clear();
        self.sink.append(decoder);
        debug!("channel {} loaded {url}", self.label);
        self.source = Some(url);
        self.duration = duration;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(Error::failed_precondition("no source loaded"));
        }
        self.sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.sink.clear();
        self.source = None;
        self.duration = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    fn volume(&self) -> f32 {
        self.sink.volume()
    }

    fn is_playing(&self) -> bool {
        !self.sink.is_paused() && !self.sink.empty()
    }

    fn source(&self) -> Option<Url> {
        self.source.clone()
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn take_ended(&mut self) -> bool {
        // An empty sink with a source still recorded means the decoder ran
        // off the end; `stop` and `load` both clear the source first.
        if self.source.is_some() && self.sink.empty() {
            debug!("channel {} reached end of stream", self.label);
            self.source = None;
            self.duration = None;
            return true;
        }
        false
    }
}
