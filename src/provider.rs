//! External streaming provider capability wrapper.
//!
//! The provider is an opaque collaborator: some other component runs the
//! OAuth dance and hosts the playback device; this wrapper only issues
//! transport commands against its REST API and relays its state-change
//! notifications. It is authoritative for transport state whenever the
//! current record's source is external.
//!
//! Readiness is a one-way latch. It is set by [`Provider::connect`] once a
//! usable playback device is known and only cleared by an explicit
//! [`Provider::disconnect`]; a device that silently dies keeps the latch
//! set and surfaces as terminal command errors instead.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use url::Url;

use crate::{
    error::{Error, ErrorKind, Result},
    http::Client as HttpClient,
    protocol::PlaybackUpdate,
    token::AccessToken,
};

/// Delay between re-registering a missing device and retrying the call.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// REST boundary of the provider.
///
/// One method per remote operation, all addressed to a specific playback
/// device. [`WebApi`] is the production implementation.
pub trait PlayerApi {
    /// Registers the device with the provider so it accepts commands.
    fn transfer(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
    /// Starts playback of a track URI on the device.
    fn play(&self, device_id: &str, uri: &str) -> impl Future<Output = Result<()>> + Send;
    fn pause(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
    fn resume(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
    fn next(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
    fn previous(&self, device_id: &str) -> impl Future<Output = Result<()>> + Send;
    fn seek(&self, device_id: &str, position: Duration)
        -> impl Future<Output = Result<()>> + Send;
    /// Sets the device volume, `volume` in [0, 1].
    fn set_volume(&self, device_id: &str, volume: f32)
        -> impl Future<Output = Result<()>> + Send;
}

type StateCallback = Box<dyn Fn(PlaybackUpdate) + Send + Sync>;

/// Capability wrapper around a [`PlayerApi`].
///
/// Gates every mutating call behind the readiness latch and applies the
/// bounded device-missing retry policy to [`play`](Self::play).
pub struct Provider<A> {
    api: A,
    device: Mutex<Option<String>>,
    ready: AtomicBool,
    /// Single-slot state-change callback: only the most recently
    /// registered consumer receives notifications, and missed events are
    /// not replayed.
    on_state: Mutex<Option<StateCallback>>,
}

impl<A> Provider<A>
where
    A: PlayerApi,
{
    pub fn new(api: A) -> Self {
        Self {
            api,
            device: Mutex::new(None),
            ready: AtomicBool::new(false),
            on_state: Mutex::new(None),
        }
    }

    /// Registers the playback device and latches readiness.
    ///
    /// A failed registration is logged but still latches: the device may
    /// already be registered from a previous run, and commands will tell.
    pub async fn connect(&self, device_id: &str) {
        if let Err(e) = self.api.transfer(device_id).await {
            warn!("playback transfer failed: {e}");
        }

        *self.device.lock().unwrap() = Some(device_id.to_owned());
        self.ready.store(true, Ordering::SeqCst);
        info!("provider ready with device {device_id}");
    }

    /// Clears the readiness latch; the only way it ever resets.
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        *self.device.lock().unwrap() = None;
        info!("provider disconnected");
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Returns the registered device or rejects the operation.
    fn require_ready(&self) -> Result<String> {
        if !self.is_ready() {
            return Err(Error::failed_precondition("provider not ready"));
        }
        self.device
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::failed_precondition("provider not ready"))
    }

    /// Starts playback of `uri`.
    ///
    /// On a device-missing condition the device is re-registered once,
    /// followed by a fixed short delay and exactly one retry; a second
    /// failure propagates to the caller.
    pub async fn play(&self, uri: &str) -> Result<()> {
        let device = self.require_ready()?;

        match self.api.play(&device, uri).await {
            Err(e) if e.kind == ErrorKind::NotFound => {
                warn!("device not found on first attempt, retrying");
                self.api.transfer(&device).await?;
                tokio::time::sleep(RETRY_DELAY).await;
                self.api.play(&device, uri).await
            }
            result => result,
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let device = self.require_ready()?;
        self.api.pause(&device).await
    }

    pub async fn resume(&self) -> Result<()> {
        let device = self.require_ready()?;
        self.api.resume(&device).await
    }

    pub async fn next(&self) -> Result<()> {
        let device = self.require_ready()?;
        self.api.next(&device).await
    }

    pub async fn previous(&self) -> Result<()> {
        let device = self.require_ready()?;
        self.api.previous(&device).await
    }

    pub async fn seek(&self, position: Duration) -> Result<()> {
        let device = self.require_ready()?;
        self.api.seek(&device, position).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        let device = self.require_ready()?;
        self.api.set_volume(&device, volume.clamp(0.0, 1.0)).await
    }

    /// Registers the state-change callback, replacing any previous one.
    pub fn on_state_changed<F>(&self, callback: F)
    where
        F: Fn(PlaybackUpdate) + Send + Sync + 'static,
    {
        *self.on_state.lock().unwrap() = Some(Box::new(callback));
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    /// Feeds one state-change notification from the provider SDK.
    pub fn handle_state_change(&self, update: PlaybackUpdate) {
        match &*self.on_state.lock().unwrap() {
            Some(callback) => callback(update),
            None => trace!("provider state change with no consumer: {update:?}"),
        }
    }
}

/// Production [`PlayerApi`] over the provider's web API.
pub struct WebApi {
    http_client: HttpClient,
    base_url: Url,
    /// Absent when the device runs without a provider credential; commands
    /// then fail without going on the wire.
    authorization: Option<HeaderValue>,
}

impl WebApi {
    const BASE_URL: &'static str = "https://api.spotify.com/v1/me/player/";

    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    pub fn new(http_client: HttpClient, token: Option<&AccessToken>) -> Result<Self> {
        let authorization = match token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            http_client,
            base_url: Url::parse(Self::BASE_URL)?,
            authorization,
        })
    }

    fn endpoint(&self, path: &str, device_id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        if let Some(device_id) = device_id {
            url.query_pairs_mut().append_pair("device_id", device_id);
        }
        Ok(url)
    }

    /// Executes a command request, mapping a 404 to the device-missing
    /// condition the wrapper's retry policy looks for.
    async fn send(&self, mut request: reqwest::Request) -> Result<()> {
        let Some(authorization) = &self.authorization else {
            return Err(Error::unauthenticated("no provider credential configured"));
        };
        request
            .headers_mut()
            .insert(AUTHORIZATION, authorization.clone());

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found("playback device not registered"));
        }

        Err(Error::unknown(format!("provider returned {status}")))
    }

    fn json_put(&self, url: Url, body: String) -> reqwest::Request {
        let mut request = self.http_client.put(url, body);
        request.headers_mut().insert(CONTENT_TYPE, Self::JSON_CONTENT);
        request
    }
}

impl PlayerApi for WebApi {
    async fn transfer(&self, device_id: &str) -> Result<()> {
        // Registration addresses the account, not the device, so the id
        // goes in the body rather than the query string.
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
        }
        let body = serde_json::json!({ "device_ids": [device_id], "play": false });
        self.send(self.json_put(url, body.to_string())).await
    }

    async fn play(&self, device_id: &str, uri: &str) -> Result<()> {
        let url = self.endpoint("play", Some(device_id))?;
        let body = serde_json::json!({ "uris": [uri] });
        self.send(self.json_put(url, body.to_string())).await
    }

    async fn pause(&self, device_id: &str) -> Result<()> {
        let url = self.endpoint("pause", Some(device_id))?;
        self.send(self.http_client.put(url, "")).await
    }

    async fn resume(&self, device_id: &str) -> Result<()> {
        let url = self.endpoint("play", Some(device_id))?;
        self.send(self.http_client.put(url, "")).await
    }

    async fn next(&self, device_id: &str) -> Result<()> {
        let url = self.endpoint("next", Some(device_id))?;
        self.send(self.http_client.post(url, "")).await
    }

    async fn previous(&self, device_id: &str) -> Result<()> {
        let url = self.endpoint("previous", Some(device_id))?;
        self.send(self.http_client.post(url, "")).await
    }

    async fn seek(&self, device_id: &str, position: Duration) -> Result<()> {
        let mut url = self.endpoint("seek", Some(device_id))?;
        url.query_pairs_mut()
            .append_pair("position_ms", &position.as_millis().to_string());
        self.send(self.http_client.put(url, "")).await
    }

    async fn set_volume(&self, device_id: &str, volume: f32) -> Result<()> {
        let mut url = self.endpoint("volume", Some(device_id))?;
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (volume.clamp(0.0, 1.0) * 100.0).round() as u8;
        url.query_pairs_mut()
            .append_pair("volume_percent", &percent.to_string());
        self.send(self.http_client.put(url, "")).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Scripted [`PlayerApi`]: pops one result per `play` call and counts
    /// everything.
    #[derive(Default)]
    struct FakePlayer {
        play_results: Mutex<VecDeque<Result<()>>>,
        play_calls: AtomicUsize,
        transfer_calls: AtomicUsize,
        pause_calls: AtomicUsize,
    }

    impl FakePlayer {
        fn scripted(results: Vec<Result<()>>) -> Self {
            Self {
                play_results: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        fn device_missing() -> Error {
            Error::not_found("playback device not registered")
        }
    }

    impl PlayerApi for FakePlayer {
        async fn transfer(&self, _device_id: &str) -> Result<()> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn play(&self, _device_id: &str, _uri: &str) -> Result<()> {
            self.play_calls.fetch_add(1, Ordering::SeqCst);
            self.play_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn pause(&self, _device_id: &str) -> Result<()> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn next(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn previous(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn seek(&self, _device_id: &str, _position: Duration) -> Result<()> {
            Ok(())
        }

        async fn set_volume(&self, _device_id: &str, _volume: f32) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutating_calls_require_readiness() {
        let provider = Provider::new(FakePlayer::default());

        let err = provider.play("spotify:track:123").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
        assert_eq!(provider.api.play_calls.load(Ordering::SeqCst), 0);

        let err = provider.pause().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
        assert_eq!(provider.api.pause_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn play_retries_exactly_once_after_device_missing() {
        let provider = Provider::new(FakePlayer::scripted(vec![
            Err(FakePlayer::device_missing()),
            Err(FakePlayer::device_missing()),
        ]));
        provider.connect("device-1").await;

        let err = provider.play("spotify:track:123").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        // One failed call, one retry, nothing more.
        assert_eq!(provider.api.play_calls.load(Ordering::SeqCst), 2);
        // One registration at connect, one re-registration before retrying.
        assert_eq!(provider.api.transfer_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn play_retry_can_succeed() {
        let provider = Provider::new(FakePlayer::scripted(vec![
            Err(FakePlayer::device_missing()),
            Ok(()),
        ]));
        provider.connect("device-1").await;

        provider.play("spotify:track:123").await.unwrap();
        assert_eq!(provider.api.play_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_missing_failures_are_not_retried() {
        let provider = Provider::new(FakePlayer::scripted(vec![Err(Error::unavailable(
            "rate limited",
        ))]));
        provider.connect("device-1").await;

        let err = provider.play("spotify:track:123").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(provider.api.play_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn state_callback_is_single_slot() {
        let provider = Provider::new(FakePlayer::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        {
            let first = Arc::clone(&first);
            provider.on_state_changed(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let second = Arc::clone(&second);
            provider.on_state_changed(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            });
        }

        provider.handle_state_change(PlaybackUpdate::default());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_the_latch() {
        let provider = Provider::new(FakePlayer::default());
        provider.connect("device-1").await;
        assert!(provider.is_ready());

        provider.disconnect();
        assert!(!provider.is_ready());
        let err = provider.next().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }
}
