//! Dual-channel crossfade playback engine.
//!
//! The engine runs as a single task owning both audio channels; everything
//! else talks to it through an [`EngineHandle`]. Commands arrive over an
//! unbounded channel so sync store listeners can trigger fades without
//! blocking, and the engine publishes its transport projection over a
//! `watch` channel.
//!
//! One channel is *active* (the track the listener hears), the other is
//! idle. A stream change loads the idle channel, plays it at zero volume
//! and ramps both channels over the fade window; the active marker only
//! flips once both ramps complete, so a fade interrupted by another change
//! or by a failed play never leaves the engine pointing at a silent
//! channel.
//!
//! Exactly one party governs the transport at any time: the engine itself
//! while the record carries a local stream URL, the external provider once
//! the URL goes away. Provider state reports received while local are
//! dropped rather than merged.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::{channel::AudioChannel, events::Event, protocol::PlaybackUpdate, ramp::Ramp};

/// Length of one crossfade.
const FADE_DURATION: Duration = Duration::from_millis(900);

/// Ramp sampling interval, roughly one audio buffer.
const TICK: Duration = Duration::from_millis(16);

/// Transport state as observed by consumers of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Playback {
    pub playing: bool,
    pub position: Duration,
    /// From the stream's decoder for local playback, from the provider's
    /// report otherwise. Absent until either side knows it.
    pub duration: Option<Duration>,
}

enum Command {
    /// The record's local stream URL changed; `None` hands the transport
    /// to the external provider.
    StreamChanged(Option<Url>),
    /// Transport report from the external provider.
    ProviderState(PlaybackUpdate),
    /// Local pause/resume request.
    SetPaused(bool),
    Shutdown,
}

/// Fade in flight. The incoming ramp always applies to the idle channel,
/// the outgoing ramp to the active one.
struct Fade {
    fade_in: Option<Ramp>,
    fade_out: Option<Ramp>,
}

/// Cheap handle for driving the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    playback: watch::Receiver<Playback>,
}

impl EngineHandle {
    /// Requests a crossfade to `url`, or a fade to silence for `None`.
    pub fn stream_changed(&self, url: Option<Url>) {
        let _ = self.commands.send(Command::StreamChanged(url));
    }

    /// Feeds a transport report from the external provider.
    pub fn provider_state(&self, update: PlaybackUpdate) {
        let _ = self.commands.send(Command::ProviderState(update));
    }

    /// Pauses or resumes local playback.
    pub fn set_paused(&self, paused: bool) {
        let _ = self.commands.send(Command::SetPaused(paused));
    }

    /// Stops the engine task; channels are silenced on the way out.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Current transport projection.
    #[must_use]
    pub fn playback(&self) -> Playback {
        *self.playback.borrow()
    }

    /// Watch receiver for transport changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Playback> {
        self.playback.clone()
    }
}

/// The engine task state. Constructed with [`Engine::new`] and consumed by
/// [`Engine::run`].
pub struct Engine<C> {
    channels: [C; 2],
    active: usize,
    fade: Option<Fade>,
    /// Transport authority latch: `true` while the external provider
    /// governs and local ticks must not touch the projection.
    external: bool,

    commands: mpsc::UnboundedReceiver<Command>,
    playback: watch::Sender<Playback>,
    events: mpsc::UnboundedSender<Event>,
}

impl<C> Engine<C>
where
    C: AudioChannel,
{
    pub fn new(channels: [C; 2], events: mpsc::UnboundedSender<Event>) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = watch::channel(Playback::default());

        let engine = Self {
            channels,
            active: 0,
            fade: None,
            external: false,
            commands: command_rx,
            playback: playback_tx,
            events,
        };
        let handle = EngineHandle {
            commands: command_tx,
            playback: playback_rx,
        };
        (engine, handle)
    }

    /// Runs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::StreamChanged(url)) => self.stream_changed(url).await,
                    Some(Command::ProviderState(update)) => self.provider_state(update),
                    Some(Command::SetPaused(paused)) => self.set_paused(paused),
                    Some(Command::Shutdown) | None => break,
                },
                _ = tick.tick() => self.tick(),
            }
        }

        for channel in &mut self.channels {
            channel.stop();
        }
        debug!("engine stopped");
    }

    async fn stream_changed(&mut self, url: Option<Url>) {
        let Some(url) = url else {
            self.external = true;
            self.fade_out_active();
            return;
        };
        self.external = false;

        let idle = 1 - self.active;

        // Idempotent: the URL is already live, or already on its way in.
        if self.fade.is_none()
            && self.channels[self.active].is_playing()
            && self.channels[self.active].source().is_some_and(|s| s == url)
        {
            trace!("stream unchanged, nothing to do");
            return;
        }
        if self
            .fade
            .as_ref()
            .is_some_and(|fade| fade.fade_in.is_some())
            && self.channels[idle].source().is_some_and(|s| s == url)
        {
            trace!("already fading to this stream");
            return;
        }

        if let Err(e) = self.channels[idle].load(url).await {
            // The listener keeps hearing the current track; the next push
            // frame or skip gets another chance.
            error!("failed to load stream: {e}");
            return;
        }

        // Every incoming stream starts from silence, even when it replaces
        // an interrupted ramp; the outgoing leg keeps its current volume.
        self.channels[idle].set_volume(0.0);
        if let Err(e) = self.channels[idle].play() {
            error!("failed to start playback: {e}");
            self.channels[idle].stop();
            return;
        }

        let now = Instant::now();
        let fade_in = Ramp::new(now, 0.0, 1.0, FADE_DURATION);
        let fade_out = self.channels[self.active].source().map(|_| {
            Ramp::new(now, self.channels[self.active].volume(), 0.0, FADE_DURATION)
        });

        self.fade = Some(Fade {
            fade_in: Some(fade_in),
            fade_out,
        });
        let _ = self.events.send(Event::TrackChanged);
    }

    /// Ramps the audible output down to silence, without bringing anything
    /// up. Used when the transport moves to the external provider.
    fn fade_out_active(&mut self) {
        let idle = 1 - self.active;
        if self.fade.take().is_some() {
            // An interrupted incoming leg is at low volume; cutting it is
            // inaudible next to fading it.
            self.channels[idle].stop();
        }

        if self.channels[self.active].source().is_some() {
            let ramp = Ramp::new(
                Instant::now(),
                self.channels[self.active].volume(),
                0.0,
                FADE_DURATION,
            );
            self.fade = Some(Fade {
                fade_in: None,
                fade_out: Some(ramp),
            });
        }
    }

    fn provider_state(&mut self, update: PlaybackUpdate) {
        if !self.external {
            // Local playback governs; a stale provider report must not
            // corrupt the projection.
            debug!("dropping provider state while playing locally");
            return;
        }
        self.playback.send_replace(Playback {
            playing: !update.paused,
            position: update.position,
            duration: Some(update.duration),
        });
    }

    fn set_paused(&mut self, paused: bool) {
        if self.external {
            debug!("ignoring local transport request while provider governs");
            return;
        }
        if paused {
            self.channels[self.active].pause();
            let _ = self.events.send(Event::Pause);
        } else if self.channels[self.active].play().is_ok() {
            let _ = self.events.send(Event::Play);
        }
        self.publish_local();
    }

    fn tick(&mut self) {
        if let Some(fade) = &self.fade {
            let now = Instant::now();
            let idle = 1 - self.active;
            let mut done = true;

            if let Some(ramp) = &fade.fade_in {
                let (volume, ramp_done) = ramp.value_at(now);
                self.channels[idle].set_volume(volume);
                done &= ramp_done;
            }
            if let Some(ramp) = &fade.fade_out {
                let (volume, ramp_done) = ramp.value_at(now);
                self.channels[self.active].set_volume(volume);
                done &= ramp_done;
            }

            if done {
                self.finish_fade();
            }
        }

        if !self.external {
            if self.channels[self.active].take_ended() {
                let _ = self.events.send(Event::TrackEnded);
            }
            self.publish_local();
        }
    }

    fn finish_fade(&mut self) {
        let Some(fade) = self.fade.take() else {
            return;
        };
        if fade.fade_in.is_some() {
            // The incoming channel is at full volume; the old active one is
            // silent and becomes the idle slot for the next fade.
            self.channels[self.active].stop();
            self.active = 1 - self.active;
        } else {
            self.channels[self.active].stop();
        }
    }

    fn publish_local(&mut self) {
        let idle = 1 - self.active;

        // Audible output comes from either lane during a fade; the active
        // marker only flips at the end, so polling it alone would report a
        // silent transport for the whole fade-in of the first track.
        let playing =
            self.channels[self.active].is_playing() || self.channels[idle].is_playing();

        // Position and duration follow the newest stream: the incoming lane
        // once its ramp has started, the active one otherwise.
        let lead = if self
            .fade
            .as_ref()
            .is_some_and(|fade| fade.fade_in.is_some())
            && self.channels[idle].is_playing()
        {
            idle
        } else {
            self.active
        };

        let playback = Playback {
            playing,
            position: self.channels[lead].position(),
            duration: self.channels[lead].duration(),
        };
        self.playback.send_if_modified(|current| {
            if *current == playback {
                false
            } else {
                *current = playback;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::error::{Error, Result};

    use super::*;

    #[derive(Default)]
    struct FakeState {
        source: Option<Url>,
        volume: f32,
        playing: bool,
        ended: bool,
        duration: Option<Duration>,
        play_calls: usize,
        fail_load: bool,
        fail_play: bool,
    }

    /// In-memory [`AudioChannel`] sharing its state with the test.
    #[derive(Clone, Default)]
    struct FakeChannel {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeChannel {
        fn snapshot(&self) -> (Option<Url>, f32, bool) {
            let state = self.state.lock().unwrap();
            (state.source.clone(), state.volume, state.playing)
        }
    }

    impl AudioChannel for FakeChannel {
        async fn load(&mut self, url: Url) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_load {
                return Err(Error::unavailable("stream not reachable"));
            }
            state.source = Some(url);
            state.playing = false;
            state.ended = false;
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.play_calls += 1;
            if state.fail_play {
                return Err(Error::internal("output device rejected playback"));
            }
            state.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.state.lock().unwrap().playing = false;
        }

        fn stop(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.source = None;
            state.playing = false;
            state.ended = false;
            state.duration = None;
        }

        fn set_volume(&mut self, volume: f32) {
            self.state.lock().unwrap().volume = volume.clamp(0.0, 1.0);
        }

        fn volume(&self) -> f32 {
            self.state.lock().unwrap().volume
        }

        fn is_playing(&self) -> bool {
            let state = self.state.lock().unwrap();
            state.playing && state.source.is_some()
        }

        fn source(&self) -> Option<Url> {
            self.state.lock().unwrap().source.clone()
        }

        fn position(&self) -> Duration {
            Duration::ZERO
        }

        fn duration(&self) -> Option<Duration> {
            self.state.lock().unwrap().duration
        }

        fn take_ended(&mut self) -> bool {
            let mut state = self.state.lock().unwrap();
            if state.ended {
                state.ended = false;
                state.source = None;
                state.playing = false;
                return true;
            }
            false
        }
    }

    struct Harness {
        handle: EngineHandle,
        events: mpsc::UnboundedReceiver<Event>,
        slots: [FakeChannel; 2],
    }

    fn start_engine() -> Harness {
        let slots = [FakeChannel::default(), FakeChannel::default()];
        let (event_tx, events) = mpsc::unbounded_channel();
        let (engine, handle) = Engine::new(slots.clone(), event_tx);
        tokio::spawn(engine.run());
        Harness {
            handle,
            events,
            slots,
        }
    }

    fn url(name: &str) -> Url {
        Url::parse(&format!("http://localhost:8000/api/audio/{name}.mp3")).unwrap()
    }

    async fn run_for(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_completes_and_flips_the_active_channel() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        let (source, volume, playing) = h.slots[1].snapshot();
        assert_eq!(source, Some(url("first")));
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(playing);

        h.handle.stream_changed(Some(url("second")));
        run_for(Duration::from_secs(2)).await;

        // Second fade came up on the other slot and the first was retired.
        let (source, volume, playing) = h.slots[0].snapshot();
        assert_eq!(source, Some(url("second")));
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(playing);
        let (source, _, playing) = h.slots[1].snapshot();
        assert_eq!(source, None);
        assert!(!playing);

        let events = drain(&mut h.events);
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == Event::TrackChanged)
                .count(),
            2
        );
        assert!(h.handle.playback().playing);
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_trigger_is_a_noop() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("track")));
        run_for(Duration::from_secs(2)).await;
        let play_calls = h.slots[1].state.lock().unwrap().play_calls;
        drain(&mut h.events);

        h.handle.stream_changed(Some(url("track")));
        run_for(Duration::from_secs(2)).await;

        assert_eq!(h.slots[1].state.lock().unwrap().play_calls, play_calls);
        assert_eq!(h.slots[0].state.lock().unwrap().play_calls, 0);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_mid_fade_redirects_to_the_new_stream() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        h.handle.stream_changed(Some(url("second")));
        run_for(Duration::from_millis(400)).await;
        h.handle.stream_changed(Some(url("third")));
        run_for(Duration::from_millis(32)).await;

        // The interrupted ramp does not carry over: "third" starts its own
        // fade-in from silence, not from where "second" got to.
        let (_, volume, _) = h.slots[0].snapshot();
        assert!(volume < 0.1, "incoming volume was {volume}");

        run_for(Duration::from_secs(2)).await;

        // "second" never became active; "third" won the fade.
        let (source, volume, playing) = h.slots[0].snapshot();
        assert_eq!(source, Some(url("third")));
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(playing);
        let (source, _, playing) = h.slots[1].snapshot();
        assert_eq!(source, None);
        assert!(!playing);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_play_never_swaps_the_active_channel() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        h.slots[0].state.lock().unwrap().fail_play = true;
        h.handle.stream_changed(Some(url("second")));
        run_for(Duration::from_secs(2)).await;

        // The incoming channel was abandoned and the old track kept its
        // volume and its place.
        let (source, _, playing) = h.slots[0].snapshot();
        assert_eq!(source, None);
        assert!(!playing);
        let (source, volume, playing) = h.slots[1].snapshot();
        assert_eq!(source, Some(url("first")));
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(playing);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_keeps_the_current_track() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        h.slots[0].state.lock().unwrap().fail_load = true;
        h.handle.stream_changed(Some(url("second")));
        run_for(Duration::from_secs(2)).await;

        let (source, _, playing) = h.slots[1].snapshot();
        assert_eq!(source, Some(url("first")));
        assert!(playing);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_stream_fades_to_silence_and_hands_over() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        h.handle.stream_changed(None);
        run_for(Duration::from_secs(2)).await;

        let (source, _, playing) = h.slots[1].snapshot();
        assert_eq!(source, None);
        assert!(!playing);

        // The provider now governs the projection.
        h.handle.provider_state(PlaybackUpdate {
            paused: false,
            position: Duration::from_secs(42),
            duration: Duration::from_secs(180),
        });
        run_for(Duration::from_millis(100)).await;
        let playback = h.handle.playback();
        assert!(playback.playing);
        assert_eq!(playback.position, Duration::from_secs(42));
        assert_eq!(playback.duration, Some(Duration::from_secs(180)));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_state_is_dropped_while_local() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;

        h.handle.provider_state(PlaybackUpdate {
            paused: true,
            position: Duration::from_secs(42),
            duration: Duration::from_secs(180),
        });
        run_for(Duration::from_millis(100)).await;

        let playback = h.handle.playback();
        assert!(playback.playing);
        assert_eq!(playback.duration, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_stream_reports_exactly_once() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;
        drain(&mut h.events);

        h.slots[1].state.lock().unwrap().ended = true;
        run_for(Duration::from_millis(100)).await;

        let events = drain(&mut h.events);
        assert_eq!(
            events.iter().filter(|e| **e == Event::TrackEnded).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn projection_reports_playing_while_the_first_track_fades_in() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_millis(400)).await;

        // Mid-fade the incoming lane is audible but the active marker has
        // not flipped yet; the projection must already say so.
        let (_, volume, playing) = h.slots[1].snapshot();
        assert!(playing);
        assert!(volume > 0.0 && volume < 1.0);
        assert!(h.handle.playback().playing);
    }

    #[tokio::test(start_paused = true)]
    async fn local_duration_comes_from_the_channel() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;
        assert_eq!(h.handle.playback().duration, None);

        h.slots[1].state.lock().unwrap().duration = Some(Duration::from_secs(214));
        run_for(Duration::from_millis(100)).await;
        assert_eq!(
            h.handle.playback().duration,
            Some(Duration::from_secs(214))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn natural_end_is_ignored_once_the_provider_governs() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;
        drain(&mut h.events);

        h.handle.stream_changed(None);
        run_for(Duration::from_millis(20)).await;
        h.slots[1].state.lock().unwrap().ended = true;
        run_for(Duration::from_secs(2)).await;

        // The provider owns the track lifecycle now; the fading-out local
        // stream running dry must not trigger a skip.
        let events = drain(&mut h.events);
        assert!(!events.contains(&Event::TrackEnded));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_drive_the_projection() {
        let mut h = start_engine();

        h.handle.stream_changed(Some(url("first")));
        run_for(Duration::from_secs(2)).await;
        drain(&mut h.events);

        h.handle.set_paused(true);
        run_for(Duration::from_millis(100)).await;
        assert!(!h.handle.playback().playing);

        h.handle.set_paused(false);
        run_for(Duration::from_millis(100)).await;
        assert!(h.handle.playback().playing);

        let events = drain(&mut h.events);
        assert!(events.contains(&Event::Pause));
        assert!(events.contains(&Event::Play));
    }
}
