//! Library reconciliation runtime component.
//!
//! Converts the device storage catalog into the normalized library store:
//! normalizes rows, folds album/artist aggregates in memory, batch-writes
//! each table, rebuilds genres, enriches missing album art from Last.fm, and
//! prunes orphans. Also serves library queries, playlist edits, and folder
//! blacklist edits over the bus.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::db_manager::DbManager;
use crate::media_catalog::{CatalogError, MediaCatalog};
use crate::preferences::{ArtDownloadPolicy, Preferences};
use crate::protocol::{Album, Artist, Genre, LibraryMessage, Message, ScanProgress, Song};
use crate::scrobbler::ScrobbleService;

/// Media shorter than this is excluded from the library (ringtones, clips).
const MIN_SONG_DURATION_MS: i64 = 30_000;
const SCAN_PROGRESS_INTERVAL: usize = 100;
const UNKNOWN_LABEL: &str = "<Unknown>";

fn folder_of(path: &str) -> String {
    match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => path.to_string(),
    }
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Coordinates library reconciliation scans and query responses.
pub struct LibraryManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    db_manager: DbManager,
    catalog: Box<dyn MediaCatalog>,
    scrobbler: Arc<dyn ScrobbleService>,
    prefs: Arc<Preferences>,
    scan_running: AtomicBool,
}

impl LibraryManager {
    /// Creates a manager bound to bus channels, storage, and the catalog.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        db_manager: DbManager,
        catalog: Box<dyn MediaCatalog>,
        scrobbler: Arc<dyn ScrobbleService>,
        prefs: Arc<Preferences>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            db_manager,
            catalog,
            scrobbler,
            prefs,
            scan_running: AtomicBool::new(false),
        }
    }

    fn publish(&self, message: LibraryMessage) {
        let _ = self.bus_producer.send(Message::Library(message));
    }

    fn publish_progress(&self, scanning: bool, scanned: usize, total: usize) {
        self.publish(LibraryMessage::ScanProgress(ScanProgress {
            scanning,
            scanned,
            total,
        }));
    }

    fn send_scan_failed(&self, error_text: String) {
        self.publish(LibraryMessage::ScanFailed(error_text));
    }

    /// Runs one reconciliation pass. Guarded so a second invocation while one
    /// is in flight is rejected instead of interleaving table writes.
    fn scan(&mut self) {
        if self
            .scan_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Library scan already running, ignoring request");
            return;
        }
        self.run_scan();
        self.scan_running.store(false, Ordering::SeqCst);
    }

    fn run_scan(&mut self) {
        self.publish_progress(true, 0, 0);

        let blacklisted = match self.db_manager.get_blacklisted_folders() {
            Ok(paths) => paths,
            Err(err) => {
                self.send_scan_failed(format!("Failed to load blacklist: {}", err));
                self.publish_progress(false, 0, 0);
                return;
            }
        };

        let rows = match self.catalog.query_music(MIN_SONG_DURATION_MS) {
            Ok(rows) => rows,
            Err(CatalogError::PermissionDenied(detail)) => {
                // Not an error to the caller: the UI offers a grant-permission
                // affordance and a later scan will succeed.
                warn!("Library scan: storage permission denied: {}", detail);
                self.publish_progress(false, 0, 0);
                return;
            }
            Err(err) => {
                self.send_scan_failed(format!("Failed to read storage catalog: {}", err));
                self.publish_progress(false, 0, 0);
                return;
            }
        };

        let total = rows.len();
        self.publish_progress(true, 0, total);

        let mut songs: Vec<Song> = Vec::with_capacity(total);
        let mut albums: HashMap<i64, Album> = HashMap::new();
        let mut artists: HashMap<i64, Artist> = HashMap::new();
        let mut artist_albums: HashMap<i64, HashSet<i64>> = HashMap::new();
        let mut scanned = 0usize;

        for row in rows {
            let folder_path = folder_of(&row.path);
            // Raw prefix match, not path-segment aware: blacklisting /music
            // also excludes /music2.
            if blacklisted
                .iter()
                .any(|prefix| folder_path.starts_with(prefix))
            {
                continue;
            }

            let title = normalize_label(&row.title);
            let artist = normalize_label(&row.artist);
            let album = normalize_label(&row.album);
            let art_uri = self.catalog.album_art_uri(row.album_id);

            songs.push(Song {
                id: row.id,
                title,
                artist: artist.clone(),
                album: album.clone(),
                album_id: row.album_id,
                artist_id: row.artist_id,
                duration_ms: row.duration_ms,
                path: row.path.clone(),
                track_number: row.track_number,
                year: row.year,
                genre: String::new(),
                date_added: row.date_added,
                art_uri: Some(art_uri.clone()),
                folder_path,
                size_bytes: row.size_bytes,
            });

            // First row for an album/artist supplies the non-count fields;
            // every row bumps the song count.
            albums
                .entry(row.album_id)
                .or_insert_with(|| Album {
                    id: row.album_id,
                    title: album,
                    artist: artist.clone(),
                    artist_id: row.artist_id,
                    year: row.year,
                    art_uri: Some(art_uri),
                    song_count: 0,
                })
                .song_count += 1;

            artists
                .entry(row.artist_id)
                .or_insert_with(|| Artist {
                    id: row.artist_id,
                    name: artist,
                    album_count: 0,
                    song_count: 0,
                })
                .song_count += 1;
            artist_albums
                .entry(row.artist_id)
                .or_default()
                .insert(row.album_id);

            scanned += 1;
            if scanned % SCAN_PROGRESS_INTERVAL == 0 {
                self.publish_progress(true, scanned, total);
            }
        }

        for (artist_id, album_ids) in &artist_albums {
            if let Some(artist) = artists.get_mut(artist_id) {
                artist.album_count = album_ids.len() as u32;
            }
        }

        // Batch writes, one transaction per table, so an interruption between
        // phases never leaves a half-written table.
        let album_rows: Vec<Album> = albums.values().cloned().collect();
        let artist_rows: Vec<Artist> = artists.values().cloned().collect();
        if let Err(err) = self.db_manager.upsert_songs(&songs) {
            self.send_scan_failed(format!("Failed to upsert songs: {}", err));
            self.publish_progress(false, scanned, total);
            return;
        }
        if let Err(err) = self.db_manager.upsert_albums(&album_rows) {
            self.send_scan_failed(format!("Failed to upsert albums: {}", err));
            self.publish_progress(false, scanned, total);
            return;
        }
        if let Err(err) = self.db_manager.upsert_artists(&artist_rows) {
            self.send_scan_failed(format!("Failed to upsert artists: {}", err));
            self.publish_progress(false, scanned, total);
            return;
        }

        let genres = match self.build_genres(&songs) {
            Ok(genres) => genres,
            Err(err) => {
                self.send_scan_failed(format!("Failed to read genre catalog: {}", err));
                self.publish_progress(false, scanned, total);
                return;
            }
        };
        if let Err(err) = self.db_manager.upsert_genres(&genres) {
            self.send_scan_failed(format!("Failed to upsert genres: {}", err));
            self.publish_progress(false, scanned, total);
            return;
        }

        // Network-bound and best-effort; runs after the local snapshot is
        // fully persisted.
        self.enrich_album_art(&songs, &albums);

        // Skipped entirely on an empty snapshot so a zero-result scan (e.g.
        // permission not yet granted) cannot wipe the library.
        if !songs.is_empty() {
            let song_ids: HashSet<i64> = songs.iter().map(|song| song.id).collect();
            let album_ids: HashSet<i64> = albums.keys().copied().collect();
            let artist_ids: HashSet<i64> = artists.keys().copied().collect();
            if let Err(err) = self.db_manager.delete_song_orphans(&song_ids) {
                self.send_scan_failed(format!("Failed to prune songs: {}", err));
                self.publish_progress(false, scanned, total);
                return;
            }
            if let Err(err) = self.db_manager.delete_album_orphans(&album_ids) {
                self.send_scan_failed(format!("Failed to prune albums: {}", err));
                self.publish_progress(false, scanned, total);
                return;
            }
            if let Err(err) = self.db_manager.delete_artist_orphans(&artist_ids) {
                self.send_scan_failed(format!("Failed to prune artists: {}", err));
                self.publish_progress(false, scanned, total);
                return;
            }
            if !genres.is_empty() {
                let genre_ids: HashSet<i64> = genres.iter().map(|genre| genre.id).collect();
                if let Err(err) = self.db_manager.delete_genre_orphans(&genre_ids) {
                    self.send_scan_failed(format!("Failed to prune genres: {}", err));
                    self.publish_progress(false, scanned, total);
                    return;
                }
            }
        }

        self.publish_progress(false, scanned, total);
        self.publish(LibraryMessage::ScanCompleted {
            song_count: songs.len(),
        });
        info!(
            "Library scan completed: {} song(s), {} album(s), {} artist(s), {} genre(s)",
            songs.len(),
            album_rows.len(),
            artist_rows.len(),
            genres.len()
        );
    }

    /// Rebuilds the genre table from the catalog's genre listing, keeping
    /// only genres with at least one member in the scanned snapshot.
    fn build_genres(&self, songs: &[Song]) -> Result<Vec<Genre>, CatalogError> {
        let genre_rows = self.catalog.genres()?;
        let song_ids: HashSet<i64> = songs.iter().map(|song| song.id).collect();
        let mut genres = Vec::new();
        for genre in genre_rows {
            let name = genre.name.trim();
            if name.is_empty() {
                continue;
            }
            let members = self.catalog.genre_member_ids(genre.id)?;
            let count = members.iter().filter(|id| song_ids.contains(id)).count();
            if count > 0 {
                genres.push(Genre {
                    id: genre.id,
                    name: name.to_string(),
                    song_count: count as u32,
                });
            }
        }
        debug!("Built {} genre(s)", genres.len());
        Ok(genres)
    }

    /// One cover lookup per album lacking a locally resolvable artwork
    /// stream. A failed lookup skips that album only.
    fn enrich_album_art(&self, songs: &[Song], albums: &HashMap<i64, Album>) {
        let policy = self.prefs.art_download_policy();
        if policy == ArtDownloadPolicy::Never {
            return;
        }
        // Connectivity classification lives with the host platform; WifiOnly
        // and Always both proceed at this layer.
        for album in albums.values() {
            if self.catalog.has_local_album_art(album.id) {
                continue;
            }
            if album.artist == UNKNOWN_LABEL || album.title == UNKNOWN_LABEL {
                continue;
            }
            let Some(url) = self.scrobbler.fetch_album_art(&album.artist, &album.title) else {
                continue;
            };
            for song in songs.iter().filter(|song| song.album_id == album.id) {
                if let Err(err) = self.db_manager.update_song_art_uri(song.id, &url) {
                    warn!("Failed to store song art uri: {}", err);
                }
            }
            if let Err(err) = self.db_manager.update_album_art_uri(album.id, &url) {
                warn!("Failed to store album art uri: {}", err);
            }
            debug!("Fetched cover art for \"{}\" by {}", album.title, album.artist);
        }
    }

    fn publish_songs(&self) {
        match self.db_manager.get_all_songs() {
            Ok(songs) => self.publish(LibraryMessage::SongsResult(songs)),
            Err(err) => self.send_scan_failed(format!("Failed to load songs: {}", err)),
        }
    }

    fn publish_albums(&self) {
        match self.db_manager.get_all_albums() {
            Ok(albums) => self.publish(LibraryMessage::AlbumsResult(albums)),
            Err(err) => self.send_scan_failed(format!("Failed to load albums: {}", err)),
        }
    }

    fn publish_artists(&self) {
        match self.db_manager.get_all_artists() {
            Ok(artists) => self.publish(LibraryMessage::ArtistsResult(artists)),
            Err(err) => self.send_scan_failed(format!("Failed to load artists: {}", err)),
        }
    }

    fn publish_genres(&self) {
        match self.db_manager.get_all_genres() {
            Ok(genres) => self.publish(LibraryMessage::GenresResult(genres)),
            Err(err) => self.send_scan_failed(format!("Failed to load genres: {}", err)),
        }
    }

    fn publish_search(&self, query: String) {
        let songs = self.db_manager.search_songs(&query).unwrap_or_default();
        let albums = self.db_manager.search_albums(&query).unwrap_or_default();
        let artists = self.db_manager.search_artists(&query).unwrap_or_default();
        self.publish(LibraryMessage::SearchResult {
            query,
            songs,
            albums,
            artists,
        });
    }

    fn publish_playlists(&self) {
        match self.db_manager.get_all_playlists() {
            Ok(playlists) => self.publish(LibraryMessage::PlaylistsResult(playlists)),
            Err(err) => self.send_scan_failed(format!("Failed to load playlists: {}", err)),
        }
    }

    fn publish_playlist_songs(&self, playlist_id: String) {
        match self.db_manager.get_playlist_songs(&playlist_id) {
            Ok(songs) => self.publish(LibraryMessage::PlaylistSongsResult { playlist_id, songs }),
            Err(err) => {
                self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                    "Failed to load playlist songs: {}",
                    err
                )));
            }
        }
    }

    fn publish_blacklist(&self) {
        match self.db_manager.get_blacklisted_folders() {
            Ok(paths) => self.publish(LibraryMessage::BlacklistResult(paths)),
            Err(err) => self.send_scan_failed(format!("Failed to load blacklist: {}", err)),
        }
    }

    fn create_playlist(&mut self, name: &str) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            self.publish(LibraryMessage::PlaylistOperationFailed(
                "playlist name cannot be empty".to_string(),
            ));
            return;
        }
        match self.db_manager.create_playlist(trimmed) {
            Ok(playlist) => {
                debug!("Created playlist {} ({})", playlist.name, playlist.id);
                self.publish_playlists();
            }
            Err(err) => self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                "Failed to create playlist: {}",
                err
            ))),
        }
    }

    fn rename_playlist(&mut self, id: &str, name: &str) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            self.publish(LibraryMessage::PlaylistOperationFailed(
                "playlist name cannot be empty".to_string(),
            ));
            return;
        }
        match self.db_manager.rename_playlist(id, trimmed) {
            Ok(()) => self.publish_playlists(),
            Err(err) => self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                "Failed to rename playlist: {}",
                err
            ))),
        }
    }

    /// Starts the blocking event loop.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Library(message)) => match message {
                    LibraryMessage::RequestScan => self.scan(),
                    LibraryMessage::RequestSongs => self.publish_songs(),
                    LibraryMessage::RequestAlbums => self.publish_albums(),
                    LibraryMessage::RequestArtists => self.publish_artists(),
                    LibraryMessage::RequestGenres => self.publish_genres(),
                    LibraryMessage::RequestSongsByAlbum { album_id } => {
                        match self.db_manager.get_songs_by_album(album_id) {
                            Ok(songs) => {
                                self.publish(LibraryMessage::AlbumSongsResult { album_id, songs })
                            }
                            Err(err) => self
                                .send_scan_failed(format!("Failed to load album songs: {}", err)),
                        }
                    }
                    LibraryMessage::RequestSongsByArtist { artist_id } => {
                        match self.db_manager.get_songs_by_artist(artist_id) {
                            Ok(songs) => {
                                self.publish(LibraryMessage::ArtistSongsResult { artist_id, songs })
                            }
                            Err(err) => self
                                .send_scan_failed(format!("Failed to load artist songs: {}", err)),
                        }
                    }
                    LibraryMessage::RequestSongsByFolder { folder } => {
                        match self.db_manager.get_songs_by_folder(&folder) {
                            Ok(songs) => {
                                self.publish(LibraryMessage::FolderSongsResult { folder, songs })
                            }
                            Err(err) => self
                                .send_scan_failed(format!("Failed to load folder songs: {}", err)),
                        }
                    }
                    LibraryMessage::RequestRecentlyAdded { since } => {
                        match self.db_manager.get_songs_added_since(since) {
                            Ok(songs) => self.publish(LibraryMessage::RecentlyAddedResult(songs)),
                            Err(err) => self.send_scan_failed(format!(
                                "Failed to load recently added songs: {}",
                                err
                            )),
                        }
                    }
                    LibraryMessage::RequestSearch { query } => self.publish_search(query),
                    LibraryMessage::CreatePlaylist { name } => self.create_playlist(&name),
                    LibraryMessage::RenamePlaylist { id, name } => {
                        self.rename_playlist(&id, &name)
                    }
                    LibraryMessage::DeletePlaylist { id } => {
                        if let Err(err) = self.db_manager.delete_playlist(&id) {
                            self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                                "Failed to delete playlist: {}",
                                err
                            )));
                        } else {
                            self.publish_playlists();
                        }
                    }
                    LibraryMessage::AddSongToPlaylist {
                        playlist_id,
                        song_id,
                    } => {
                        if let Err(err) =
                            self.db_manager.add_song_to_playlist(&playlist_id, song_id)
                        {
                            self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                                "Failed to add song to playlist: {}",
                                err
                            )));
                        } else {
                            self.publish_playlist_songs(playlist_id);
                        }
                    }
                    LibraryMessage::RemoveSongFromPlaylist {
                        playlist_id,
                        song_id,
                    } => {
                        if let Err(err) = self
                            .db_manager
                            .remove_song_from_playlist(&playlist_id, song_id)
                        {
                            self.publish(LibraryMessage::PlaylistOperationFailed(format!(
                                "Failed to remove song from playlist: {}",
                                err
                            )));
                        } else {
                            self.publish_playlist_songs(playlist_id);
                        }
                    }
                    LibraryMessage::RequestPlaylists => self.publish_playlists(),
                    LibraryMessage::RequestPlaylistSongs { playlist_id } => {
                        self.publish_playlist_songs(playlist_id)
                    }
                    LibraryMessage::AddBlacklistedFolder { path } => {
                        if let Err(err) = self.db_manager.add_blacklisted_folder(&path) {
                            self.send_scan_failed(format!("Failed to blacklist folder: {}", err));
                        } else {
                            self.publish_blacklist();
                        }
                    }
                    LibraryMessage::RemoveBlacklistedFolder { path } => {
                        if let Err(err) = self.db_manager.remove_blacklisted_folder(&path) {
                            self.send_scan_failed(format!(
                                "Failed to remove blacklisted folder: {}",
                                err
                            ));
                        } else {
                            self.publish_blacklist();
                        }
                    }
                    LibraryMessage::RequestBlacklist => self.publish_blacklist(),
                    // Results and notifications published by this manager.
                    _ => {}
                },
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "LibraryManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
