//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between library
//! reconciliation, playback session control, and the engine event feed,
//! plus the library entity types they carry.

/// Repeat behavior applied when playback reaches the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
pub enum RepeatMode {
    #[default]
    Off, // Stop after the last queue item
    All, // Restart the queue from the beginning
    One, // Repeat the current track
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Library(LibraryMessage),
    Playback(PlaybackMessage),
    Engine(EngineEvent),
}

/// One indexed song row in the music library.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Song {
    /// Stable id assigned by the device storage catalog.
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: i64,
    pub artist_id: i64,
    /// Duration in milliseconds.
    pub duration_ms: i64,
    /// File path on device storage.
    pub path: String,
    pub track_number: i32,
    pub year: i32,
    pub genre: String,
    /// Epoch seconds the file appeared in the catalog.
    pub date_added: i64,
    pub art_uri: Option<String>,
    /// Containing directory, derived from `path` up to the last separator.
    pub folder_path: String,
    pub size_bytes: i64,
}

/// One album aggregate row in the music library.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub artist_id: i64,
    pub year: i32,
    pub art_uri: Option<String>,
    pub song_count: u32,
}

/// One artist aggregate row in the music library.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub album_count: u32,
    pub song_count: u32,
}

/// One genre aggregate row in the music library.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub song_count: u32,
}

/// Minimal playlist metadata row.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaylistInfo {
    /// Stable playlist id.
    pub id: String,
    /// User-visible name.
    pub name: String,
    /// Epoch seconds the playlist was created.
    pub created_at: i64,
}

/// Three-state library scan signal: idle, running, idle again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanProgress {
    pub scanning: bool,
    pub scanned: usize,
    pub total: usize,
}

/// Library-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum LibraryMessage {
    RequestScan,
    ScanProgress(ScanProgress),
    ScanCompleted {
        song_count: usize,
    },
    ScanFailed(String),
    RequestSongs,
    RequestAlbums,
    RequestArtists,
    RequestGenres,
    RequestSongsByAlbum {
        album_id: i64,
    },
    RequestSongsByArtist {
        artist_id: i64,
    },
    RequestSongsByFolder {
        folder: String,
    },
    RequestRecentlyAdded {
        since: i64,
    },
    RequestSearch {
        query: String,
    },
    SongsResult(Vec<Song>),
    AlbumsResult(Vec<Album>),
    ArtistsResult(Vec<Artist>),
    GenresResult(Vec<Genre>),
    AlbumSongsResult {
        album_id: i64,
        songs: Vec<Song>,
    },
    ArtistSongsResult {
        artist_id: i64,
        songs: Vec<Song>,
    },
    FolderSongsResult {
        folder: String,
        songs: Vec<Song>,
    },
    RecentlyAddedResult(Vec<Song>),
    SearchResult {
        query: String,
        songs: Vec<Song>,
        albums: Vec<Album>,
        artists: Vec<Artist>,
    },
    CreatePlaylist {
        name: String,
    },
    RenamePlaylist {
        id: String,
        name: String,
    },
    DeletePlaylist {
        id: String,
    },
    AddSongToPlaylist {
        playlist_id: String,
        song_id: i64,
    },
    RemoveSongFromPlaylist {
        playlist_id: String,
        song_id: i64,
    },
    RequestPlaylists,
    RequestPlaylistSongs {
        playlist_id: String,
    },
    PlaylistsResult(Vec<PlaylistInfo>),
    PlaylistSongsResult {
        playlist_id: String,
        songs: Vec<Song>,
    },
    PlaylistOperationFailed(String),
    AddBlacklistedFolder {
        path: String,
    },
    RemoveBlacklistedFolder {
        path: String,
    },
    RequestBlacklist,
    BlacklistResult(Vec<String>),
}

/// One queue entry handed to the playback engine.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TransportItem {
    /// Library song id.
    pub id: i64,
    /// Playable location of the media.
    pub uri: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_uri: Option<String>,
}

impl TransportItem {
    /// Builds a transport item from a library song row.
    pub fn from_song(song: &Song) -> Self {
        Self {
            id: song.id,
            uri: song.path.clone(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            art_uri: song.art_uri.clone(),
        }
    }
}

/// Failure classes reported by the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    FileNotFound,
    NoPermission,
    UnsupportedFormat,
    Network,
    Other,
}

/// Push notifications emitted by the playback engine after binding.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PlayingChanged(bool),
    TrackTransition(Option<TransportItem>),
    RepeatModeChanged(RepeatMode),
    ShuffleChanged(bool),
    TimelineChanged,
    /// Generic event tick used to refresh the playback position.
    Tick,
    PlayerError(EngineErrorKind),
}

/// Playback-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    Play,
    Pause,
    SeekTo(u64),
    SkipNext,
    SkipPrevious,
    SkipToQueueItem(usize),
    SetRepeatMode(RepeatMode),
    SetShuffle(bool),
    /// Replace the whole queue from library songs and start playback.
    ReplaceQueue {
        songs: Vec<Song>,
        start_index: usize,
    },
    Append(Song),
    InsertNext(Song),
    ClearError,
    PlayingChanged(bool),
    CurrentTrackChanged {
        item: Option<TransportItem>,
        queue_index: usize,
    },
    RepeatModeChanged(RepeatMode),
    ShuffleChanged(bool),
    PositionChanged {
        position_ms: u64,
        duration_ms: u64,
    },
    QueueChanged {
        items: Vec<TransportItem>,
        index: usize,
    },
    PlaybackErrorChanged(Option<String>),
}
