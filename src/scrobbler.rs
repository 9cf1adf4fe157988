//! Scrobbling coordinator between the Last.fm client and preferences.
//!
//! Playback reporting must never disrupt playback: now-playing and scrobble
//! submissions are gated on the scrobbling preference plus a stored session
//! key and swallow every client error. Only the explicit `login` call
//! propagates a typed error for display.

use std::sync::Arc;

use log::{debug, warn};

use crate::lastfm_client::{LastFmClient, LastFmError};
use crate::preferences::Preferences;

/// Playback-reporting surface consumed by the runtime managers.
pub trait ScrobbleService: Send + Sync {
    /// Immediate now-playing notification; failures are swallowed.
    fn now_playing(&self, artist: &str, track: &str, album: Option<&str>, duration_sec: i64);

    /// Committed scrobble with the track-start timestamp in epoch seconds;
    /// failures are swallowed.
    fn submit(
        &self,
        artist: &str,
        track: &str,
        album: Option<&str>,
        timestamp: i64,
        duration_sec: i64,
    );

    /// Cover-art lookup; `None` on any failure.
    fn fetch_album_art(&self, artist: &str, album: &str) -> Option<String>;
}

/// Concrete service backed by the Last.fm client and the preference store.
pub struct Scrobbler {
    client: LastFmClient,
    prefs: Arc<Preferences>,
}

impl Scrobbler {
    pub fn new(client: LastFmClient, prefs: Arc<Preferences>) -> Self {
        Self { client, prefs }
    }

    /// Authenticates and persists the session key. Returns the username on
    /// success; auth rejections and transport failures stay distinguishable
    /// through `LastFmError`.
    pub fn login(&self, username: &str, password: &str) -> Result<String, LastFmError> {
        let session_key = self.client.get_mobile_session(username, password)?;
        self.prefs.set_lastfm_credentials(username, &session_key);
        Ok(username.to_string())
    }

    pub fn logout(&self) {
        self.prefs.set_lastfm_credentials("", "");
    }

    fn session_key(&self) -> Option<String> {
        if !self.prefs.scrobbling_enabled() {
            return None;
        }
        let key = self.prefs.lastfm_session_key();
        if key.trim().is_empty() {
            None
        } else {
            Some(key)
        }
    }
}

impl ScrobbleService for Scrobbler {
    fn now_playing(&self, artist: &str, track: &str, album: Option<&str>, duration_sec: i64) {
        let Some(session_key) = self.session_key() else {
            return;
        };
        if let Err(err) =
            self.client
                .update_now_playing(&session_key, artist, track, album, duration_sec)
        {
            warn!("now-playing update failed: {}", err);
        }
    }

    fn submit(
        &self,
        artist: &str,
        track: &str,
        album: Option<&str>,
        timestamp: i64,
        duration_sec: i64,
    ) {
        let Some(session_key) = self.session_key() else {
            return;
        };
        match self
            .client
            .scrobble(&session_key, artist, track, album, timestamp, duration_sec)
        {
            Ok(()) => debug!("Scrobbled: {} - {}", artist, track),
            Err(err) => warn!("scrobble failed: {}", err),
        }
    }

    fn fetch_album_art(&self, artist: &str, album: &str) -> Option<String> {
        match self.client.album_art_url(artist, album) {
            Ok(url) => url,
            Err(err) => {
                warn!("album art lookup failed for {} - {}: {}", artist, album, err);
                None
            }
        }
    }
}
