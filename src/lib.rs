//! Headless personal media player core.
//!
//! Indexes the device storage catalog into a normalized SQLite library,
//! mirrors an out-of-process playback engine as observable state, reports
//! listens to Last.fm, and derives a navigable folder tree from flat paths.
//!
//! Components communicate over a single broadcast event bus of
//! [`protocol::Message`] values; each stateful component is a manager with a
//! blocking `run()` loop. The platform collaborators (storage catalog,
//! playback engine) are consumed through the [`media_catalog::MediaCatalog`]
//! and [`playback_engine::PlaybackEngine`] traits; hosts implement those and
//! wire the managers onto the bus.

pub mod db_manager;
pub mod folder_browser;
pub mod lastfm_client;
pub mod library_manager;
pub mod media_catalog;
pub mod playback_engine;
pub mod playback_manager;
pub mod preferences;
pub mod protocol;
pub mod scrobbler;
