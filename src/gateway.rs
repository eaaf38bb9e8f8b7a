//! Backend HTTP API client.
//!
//! The backend owns the now-playing state; this client only reads the
//! current snapshot, persists likes and forwards simulation patches. All
//! push traffic goes through [`push`](crate::push) instead.

use std::future::Future;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{self, LikeRequest, NowPlaying, StatePatch},
};

/// The slice of the backend API the store and command layer depend on.
///
/// A trait so tests can drive the store and command layer without a
/// backend; production code uses [`Gateway`].
pub trait NowPlayingApi {
    /// Fetches the current now-playing snapshot.
    fn fetch_state(&self) -> impl Future<Output = Result<NowPlaying>> + Send;

    /// Persists a like/unlike for the given track.
    fn post_like(&self, like: LikeRequest) -> impl Future<Output = Result<()>> + Send;

    /// Forwards a simulation patch to the developer endpoint.
    fn dev_patch(&self, patch: StatePatch) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP implementation of [`NowPlayingApi`] against the Globe Radio
/// backend.
pub struct Gateway {
    http_client: HttpClient,
    base_url: Url,
}

impl Gateway {
    const STATE_PATH: &'static str = "/api/state";
    const LIKE_PATH: &'static str = "/api/like";
    const DEV_PATCH_PATH: &'static str = "/api/dev/patch";

    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            base_url: config.base_url.clone(),
        })
    }

    /// Resolves a possibly server-relative URL (stream or cover) against
    /// the backend base URL.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Url::parse(url).map_err(Into::into)
        } else {
            self.base_url.join(url).map_err(Into::into)
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Into::into)
    }

    /// POSTs a JSON body and checks for a success status.
    async fn post_json<T>(&self, path: &str, body: &T) -> Result<reqwest::Response>
    where
        T: serde::Serialize,
    {
        let url = self.endpoint(path)?;
        let mut request = self.http_client.post(url, serde_json::to_string(body)?);
        request.headers_mut().insert(CONTENT_TYPE, Self::JSON_CONTENT);

        let response = self.http_client.execute(request).await?;
        response.error_for_status().map_err(Into::into)
    }
}

impl NowPlayingApi for Gateway {
    async fn fetch_state(&self) -> Result<NowPlaying> {
        let url = self.endpoint(Self::STATE_PATH)?;
        let request = self.http_client.get(url, "");
        let response = self.http_client.execute(request).await?;
        let response = response.error_for_status()?;

        let body = response.text().await?;
        protocol::json(&body, Self::STATE_PATH)
    }

    async fn post_like(&self, like: LikeRequest) -> Result<()> {
        self.post_json(Self::LIKE_PATH, &like).await?;
        debug!("like persisted for {}", like.track_id);
        Ok(())
    }

    async fn dev_patch(&self, patch: StatePatch) -> Result<()> {
        let response = self.post_json(Self::DEV_PATCH_PATH, &patch).await?;

        // The endpoint echoes the accepted patch; surface rejections that
        // come back as a 200 with an empty body.
        let body = response.text().await?;
        if body.is_empty() {
            return Err(Error::internal("dev patch endpoint returned no body"));
        }
        trace!("dev patch accepted: {body}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        let config = Config::new(Url::parse("http://localhost:8000").unwrap()).unwrap();
        Gateway::new(&config).unwrap()
    }

    #[test]
    fn resolves_relative_urls_against_the_backend() {
        let gateway = gateway();
        assert_eq!(
            gateway
                .resolve("/api/audio/Nigeria/1970s/track.mp3")
                .unwrap()
                .as_str(),
            "http://localhost:8000/api/audio/Nigeria/1970s/track.mp3"
        );
    }

    #[test]
    fn leaves_absolute_urls_untouched() {
        let gateway = gateway();
        assert_eq!(
            gateway.resolve("https://cdn.example.com/a.mp3").unwrap().as_str(),
            "https://cdn.example.com/a.mp3"
        );
    }
}
