//! Runtime configuration for the player.

use url::Url;
use uuid::Uuid;

use crate::error::Result;

/// Configuration assembled at startup from the command line and the host
/// environment. Everything here is immutable for the lifetime of the
/// process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    /// Device name as shown to the streaming provider.
    pub device_name: String,
    /// Stable device identifier, derived from the machine id.
    pub device_id: Uuid,

    /// Backend base URL, e.g. `http://localhost:8000`.
    pub base_url: Url,
    /// Push channel endpoint, derived from `base_url`.
    pub ws_url: Url,

    pub user_agent: String,
}

impl Config {
    /// Path of the push channel endpoint on the backend.
    const PUSH_PATH: &'static str = "/ws";

    /// Builds a configuration for the given backend base URL.
    ///
    /// The device id is a UUIDv5 of the machine id so it survives restarts;
    /// a random id is used when the machine id cannot be read.
    pub fn new(base_url: Url) -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let device_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"globe-radio.local");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("could not get machine id, using random device id: {e}");
                Uuid::new_v4()
            }
        };
        trace!("device uuid: {device_id}");

        let device_name =
            sysinfo::System::host_name().unwrap_or_else(|| format!("{app_name} player"));

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        let ws_url = Self::push_url(&base_url)?;

        Ok(Self {
            app_name,
            app_version,
            device_name,
            device_id,
            base_url,
            ws_url,
            user_agent,
        })
    }

    /// Derives the websocket endpoint from the backend base URL by
    /// switching the scheme to `ws`/`wss` and appending the push path.
    fn push_url(base_url: &Url) -> Result<Url> {
        let mut ws_url = base_url.join(Self::PUSH_PATH)?;
        let scheme = if base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        if ws_url.set_scheme(scheme).is_err() {
            return Err(crate::error::Error::invalid_argument(format!(
                "cannot derive push url from {base_url}"
            )));
        }
        Ok(ws_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_follows_base_scheme() {
        let http = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(
            Config::push_url(&http).unwrap().as_str(),
            "ws://localhost:8000/ws"
        );

        let https = Url::parse("https://radio.local:8000").unwrap();
        assert_eq!(
            Config::push_url(&https).unwrap().as_str(),
            "wss://radio.local:8000/ws"
        );
    }
}
