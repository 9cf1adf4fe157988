//! Raw Last.fm API client.
//!
//! All write calls are form-encoded POSTs against a single endpoint and carry
//! `api_sig`, the hex MD5 of the key-sorted parameter list (minus `format`)
//! with the shared secret appended. `album.getInfo` is the one unsigned,
//! public read used for artwork lookups.

use std::time::Duration;

use serde_json::Value;

const BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Failure classes for Last.fm calls. Remote-rejected requests (bad
/// credentials, invalid session) are kept apart from transport failures so
/// login surfaces "bad credentials" rather than "check connection".
#[derive(Debug, Clone, PartialEq)]
pub enum LastFmError {
    /// The service processed the request and rejected it.
    Api {
        code: Option<i64>,
        message: String,
    },
    /// Transport-level failure (DNS, TLS, timeout).
    Http(String),
    /// Response body did not match the expected shape.
    Malformed(String),
}

impl std::fmt::Display for LastFmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LastFmError::Api { code, message } => match code {
                Some(code) => write!(f, "Last.fm error {}: {}", code, message),
                None => write!(f, "Last.fm error: {}", message),
            },
            LastFmError::Http(detail) => write!(f, "Last.fm request failed: {}", detail),
            LastFmError::Malformed(detail) => {
                write!(f, "Last.fm response parse failed: {}", detail)
            }
        }
    }
}

impl std::error::Error for LastFmError {}

/// Last.fm adapter backed by `ureq`.
pub struct LastFmClient {
    http_client: ureq::Agent,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl LastFmClient {
    /// Creates a client for one API account.
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self {
            http_client,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url: BASE_URL.to_string(),
        }
    }

    fn md5_hex(input: &str) -> String {
        format!("{:x}", md5::compute(input))
    }

    /// `api_sig` = MD5 of all params except `format`, sorted by key and
    /// concatenated as `key + value` pairs, with the secret appended.
    fn api_signature(params: &[(String, String)], secret: &str) -> String {
        let mut signable: Vec<&(String, String)> = params
            .iter()
            .filter(|(key, _)| key != "format")
            .collect();
        signable.sort_by(|left, right| left.0.cmp(&right.0));
        let concatenated: String = signable
            .iter()
            .map(|(key, value)| format!("{}{}", key, value))
            .collect();
        Self::md5_hex(&format!("{}{}", concatenated, secret))
    }

    fn mobile_auth_token(username: &str, password: &str) -> String {
        Self::md5_hex(&format!(
            "{}{}",
            username.to_lowercase(),
            Self::md5_hex(password)
        ))
    }

    fn signed_params(
        &self,
        method: &str,
        session_key: Option<&str>,
        extra: Vec<(String, String)>,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("method".to_string(), method.to_string()),
            ("api_key".to_string(), self.api_key.clone()),
        ];
        if let Some(session_key) = session_key {
            params.push(("sk".to_string(), session_key.to_string()));
        }
        params.extend(extra);
        params.push(("format".to_string(), "json".to_string()));
        let signature = Self::api_signature(&params, &self.api_secret);
        params.push(("api_sig".to_string(), signature));
        params
    }

    fn remote_error(payload: &Value) -> Option<LastFmError> {
        let code = payload.get("error")?.as_i64();
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Last.fm returned an error")
            .to_string();
        Some(LastFmError::Api { code, message })
    }

    fn post_form(&self, params: &[(String, String)]) -> Result<Value, LastFmError> {
        let pairs: Vec<(&str, &str)> = params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let response = match self.http_client.post(&self.base_url).send_form(&pairs) {
            Ok(response) => response,
            // Last.fm reports rejected requests as 4xx with a JSON body.
            Err(ureq::Error::Status(status, response)) => {
                let payload: Value = response
                    .into_json()
                    .map_err(|err| LastFmError::Malformed(err.to_string()))?;
                return Err(Self::remote_error(&payload)
                    .unwrap_or(LastFmError::Http(format!("status {}", status))));
            }
            Err(err) => return Err(LastFmError::Http(err.to_string())),
        };
        let payload: Value = response
            .into_json()
            .map_err(|err| LastFmError::Malformed(err.to_string()))?;
        if let Some(error) = Self::remote_error(&payload) {
            return Err(error);
        }
        Ok(payload)
    }

    /// Exchanges username + password for a persistent session key via
    /// `auth.getMobileSession`.
    pub fn get_mobile_session(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, LastFmError> {
        let params = self.signed_params(
            "auth.getMobileSession",
            None,
            vec![
                ("username".to_string(), username.to_string()),
                (
                    "authToken".to_string(),
                    Self::mobile_auth_token(username, password),
                ),
            ],
        );
        let payload = self.post_form(&params)?;
        payload
            .get("session")
            .and_then(|session| session.get("key"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| LastFmError::Malformed("session key missing".to_string()))
    }

    /// `track.updateNowPlaying` — non-committal signal that playback started.
    pub fn update_now_playing(
        &self,
        session_key: &str,
        artist: &str,
        track: &str,
        album: Option<&str>,
        duration_sec: i64,
    ) -> Result<(), LastFmError> {
        let mut extra = vec![
            ("artist".to_string(), artist.to_string()),
            ("track".to_string(), track.to_string()),
        ];
        if let Some(album) = album.filter(|album| !album.trim().is_empty()) {
            extra.push(("album".to_string(), album.to_string()));
        }
        if duration_sec > 0 {
            extra.push(("duration".to_string(), duration_sec.to_string()));
        }
        let params = self.signed_params("track.updateNowPlaying", Some(session_key), extra);
        self.post_form(&params).map(|_| ())
    }

    /// `track.scrobble` — committed listen with the track-start timestamp in
    /// epoch seconds.
    pub fn scrobble(
        &self,
        session_key: &str,
        artist: &str,
        track: &str,
        album: Option<&str>,
        timestamp: i64,
        duration_sec: i64,
    ) -> Result<(), LastFmError> {
        let mut extra = vec![
            ("artist".to_string(), artist.to_string()),
            ("track".to_string(), track.to_string()),
        ];
        if let Some(album) = album.filter(|album| !album.trim().is_empty()) {
            extra.push(("album".to_string(), album.to_string()));
        }
        extra.push(("timestamp".to_string(), timestamp.to_string()));
        if duration_sec > 0 {
            extra.push(("duration".to_string(), duration_sec.to_string()));
        }
        let params = self.signed_params("track.scrobble", Some(session_key), extra);
        self.post_form(&params).map(|_| ())
    }

    /// Fetches the best available cover URL via the public `album.getInfo`.
    /// Returns `Ok(None)` when the album is unknown or carries no usable
    /// image.
    pub fn album_art_url(
        &self,
        artist: &str,
        album: &str,
    ) -> Result<Option<String>, LastFmError> {
        let url = format!(
            "{}?method=album.getInfo&artist={}&album={}&api_key={}&format=json",
            self.base_url,
            urlencoding::encode(artist),
            urlencoding::encode(album),
            urlencoding::encode(&self.api_key),
        );
        let response = match self.http_client.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let payload: Value = response
                    .into_json()
                    .map_err(|err| LastFmError::Malformed(err.to_string()))?;
                return Err(Self::remote_error(&payload)
                    .unwrap_or(LastFmError::Http(format!("status {}", status))));
            }
            Err(err) => return Err(LastFmError::Http(err.to_string())),
        };
        let payload: Value = response
            .into_json()
            .map_err(|err| LastFmError::Malformed(err.to_string()))?;
        if let Some(error) = Self::remote_error(&payload) {
            return Err(error);
        }
        Ok(Self::best_image_url(&payload))
    }

    fn size_rank(size: &str) -> u8 {
        match size {
            "mega" => 5,
            "extralarge" => 4,
            "large" => 3,
            "medium" => 2,
            "small" => 1,
            _ => 0,
        }
    }

    fn best_image_url(payload: &Value) -> Option<String> {
        let images = payload.get("album")?.get("image")?.as_array()?;
        images
            .iter()
            .filter_map(|image| {
                let url = image.get("#text").and_then(Value::as_str)?.trim();
                if url.is_empty() {
                    return None;
                }
                let size = image.get("size").and_then(Value::as_str).unwrap_or("");
                Some((Self::size_rank(size), url.to_string()))
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, url)| url)
    }
}
