//! SQLite-backed library store.
//!
//! Holds the reconciled song/album/artist/genre tables plus user-owned
//! playlists and the folder blacklist. Batch writes run as one transaction
//! per collection so an interrupted scan never leaves a half-written table.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::protocol::{Album, Artist, Genre, PlaylistInfo, Song};

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn new() -> Result<Self, rusqlite::Error> {
        let data_dir = dirs::data_dir()
            .expect("Could not find data directory")
            .join("quaver");

        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).expect("Could not create data directory");
        }

        let db_path = data_dir.join("library.db");
        let conn = Connection::open(db_path)?;

        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    /// Opens a throwaway store backed by memory, used by tests.
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                album_id INTEGER NOT NULL,
                artist_id INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                path TEXT NOT NULL,
                track_number INTEGER NOT NULL,
                year INTEGER NOT NULL,
                genre TEXT NOT NULL,
                date_added INTEGER NOT NULL,
                art_uri TEXT,
                folder_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_songs_album_id ON songs(album_id);
            CREATE INDEX IF NOT EXISTS idx_songs_artist_id ON songs(artist_id);
            CREATE INDEX IF NOT EXISTS idx_songs_title ON songs(title);
            CREATE INDEX IF NOT EXISTS idx_songs_folder_path ON songs(folder_path);
            CREATE INDEX IF NOT EXISTS idx_songs_date_added ON songs(date_added);
            CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                artist_id INTEGER NOT NULL,
                year INTEGER NOT NULL,
                art_uri TEXT,
                song_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS artists (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                album_count INTEGER NOT NULL,
                song_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                song_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS playlists (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS playlist_songs (
                playlist_id TEXT NOT NULL,
                song_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (playlist_id, song_id)
            );
            CREATE INDEX IF NOT EXISTS idx_playlist_songs_song_id
                ON playlist_songs(song_id);
            CREATE TABLE IF NOT EXISTS blacklisted_folders (
                path TEXT PRIMARY KEY
            );",
        )
    }

    fn unix_now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0)
    }

    fn song_from_row(row: &rusqlite::Row<'_>) -> Result<Song, rusqlite::Error> {
        Ok(Song {
            id: row.get(0)?,
            title: row.get(1)?,
            artist: row.get(2)?,
            album: row.get(3)?,
            album_id: row.get(4)?,
            artist_id: row.get(5)?,
            duration_ms: row.get(6)?,
            path: row.get(7)?,
            track_number: row.get(8)?,
            year: row.get(9)?,
            genre: row.get(10)?,
            date_added: row.get(11)?,
            art_uri: row.get(12)?,
            folder_path: row.get(13)?,
            size_bytes: row.get(14)?,
        })
    }

    const SONG_COLUMNS: &'static str = "id, title, artist, album, album_id, artist_id, \
         duration_ms, path, track_number, year, genre, date_added, art_uri, folder_path, \
         size_bytes";

    fn collect_songs(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Song>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let song_iter = stmt.query_map(args, Self::song_from_row)?;
        let mut songs = Vec::new();
        for song in song_iter {
            songs.push(song?);
        }
        Ok(songs)
    }

    pub fn upsert_songs(&mut self, songs: &[Song]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO songs (id, title, artist, album, album_id, artist_id, \
                 duration_ms, path, track_number, year, genre, date_added, art_uri, folder_path, \
                 size_bytes) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for song in songs {
                stmt.execute(params![
                    song.id,
                    song.title,
                    song.artist,
                    song.album,
                    song.album_id,
                    song.artist_id,
                    song.duration_ms,
                    song.path,
                    song.track_number,
                    song.year,
                    song.genre,
                    song.date_added,
                    song.art_uri,
                    song.folder_path,
                    song.size_bytes,
                ])?;
            }
        }
        tx.commit()
    }

    pub fn upsert_albums(&mut self, albums: &[Album]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO albums (id, title, artist, artist_id, year, art_uri, \
                 song_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for album in albums {
                stmt.execute(params![
                    album.id,
                    album.title,
                    album.artist,
                    album.artist_id,
                    album.year,
                    album.art_uri,
                    album.song_count,
                ])?;
            }
        }
        tx.commit()
    }

    pub fn upsert_artists(&mut self, artists: &[Artist]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO artists (id, name, album_count, song_count) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for artist in artists {
                stmt.execute(params![
                    artist.id,
                    artist.name,
                    artist.album_count,
                    artist.song_count,
                ])?;
            }
        }
        tx.commit()
    }

    pub fn upsert_genres(&mut self, genres: &[Genre]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO genres (id, name, song_count) VALUES (?1, ?2, ?3)",
            )?;
            for genre in genres {
                stmt.execute(params![genre.id, genre.name, genre.song_count])?;
            }
        }
        tx.commit()
    }

    fn delete_rows_not_in(
        &mut self,
        table: &str,
        active_ids: &HashSet<i64>,
    ) -> Result<(), rusqlite::Error> {
        let existing: Vec<i64> = {
            let mut stmt = self.conn.prepare(&format!("SELECT id FROM {}", table))?;
            let id_iter = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut ids = Vec::new();
            for id in id_iter {
                ids.push(id?);
            }
            ids
        };
        let orphans: Vec<i64> = existing
            .into_iter()
            .filter(|id| !active_ids.contains(id))
            .collect();
        if orphans.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", table))?;
            for id in orphans {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()
    }

    pub fn delete_song_orphans(&mut self, active_ids: &HashSet<i64>) -> Result<(), rusqlite::Error> {
        self.delete_rows_not_in("songs", active_ids)
    }

    pub fn delete_album_orphans(
        &mut self,
        active_ids: &HashSet<i64>,
    ) -> Result<(), rusqlite::Error> {
        self.delete_rows_not_in("albums", active_ids)
    }

    pub fn delete_artist_orphans(
        &mut self,
        active_ids: &HashSet<i64>,
    ) -> Result<(), rusqlite::Error> {
        self.delete_rows_not_in("artists", active_ids)
    }

    pub fn delete_genre_orphans(
        &mut self,
        active_ids: &HashSet<i64>,
    ) -> Result<(), rusqlite::Error> {
        self.delete_rows_not_in("genres", active_ids)
    }

    pub fn update_song_art_uri(&self, song_id: i64, art_uri: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE songs SET art_uri = ?1 WHERE id = ?2",
            params![art_uri, song_id],
        )?;
        Ok(())
    }

    pub fn update_album_art_uri(
        &self,
        album_id: i64,
        art_uri: &str,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE albums SET art_uri = ?1 WHERE id = ?2",
            params![art_uri, album_id],
        )?;
        Ok(())
    }

    pub fn get_all_songs(&self) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs ORDER BY title ASC",
                Self::SONG_COLUMNS
            ),
            &[],
        )
    }

    pub fn get_song_by_id(&self, id: i64) -> Result<Option<Song>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM songs WHERE id = ?1 LIMIT 1", Self::SONG_COLUMNS),
                params![id],
                Self::song_from_row,
            )
            .optional()
    }

    pub fn get_songs_by_album(&self, album_id: i64) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs WHERE album_id = ?1 ORDER BY track_number ASC",
                Self::SONG_COLUMNS
            ),
            &[&album_id],
        )
    }

    pub fn get_songs_by_artist(&self, artist_id: i64) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs WHERE artist_id = ?1 ORDER BY album ASC, track_number ASC",
                Self::SONG_COLUMNS
            ),
            &[&artist_id],
        )
    }

    pub fn get_songs_by_folder(&self, folder: &str) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs WHERE folder_path = ?1 ORDER BY title ASC",
                Self::SONG_COLUMNS
            ),
            &[&folder],
        )
    }

    pub fn get_songs_added_since(&self, since: i64) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs WHERE date_added >= ?1 ORDER BY date_added DESC",
                Self::SONG_COLUMNS
            ),
            &[&since],
        )
    }

    pub fn search_songs(&self, query: &str) -> Result<Vec<Song>, rusqlite::Error> {
        let pattern = format!("%{}%", query);
        self.collect_songs(
            &format!(
                "SELECT {} FROM songs WHERE title LIKE ?1 OR artist LIKE ?1 OR album LIKE ?1 \
                 LIMIT 60",
                Self::SONG_COLUMNS
            ),
            &[&pattern],
        )
    }

    pub fn get_all_albums(&self) -> Result<Vec<Album>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, artist_id, year, art_uri, song_count FROM albums \
             ORDER BY title ASC",
        )?;
        let album_iter = stmt.query_map([], |row| {
            Ok(Album {
                id: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                artist_id: row.get(3)?,
                year: row.get(4)?,
                art_uri: row.get(5)?,
                song_count: row.get(6)?,
            })
        })?;
        let mut albums = Vec::new();
        for album in album_iter {
            albums.push(album?);
        }
        Ok(albums)
    }

    pub fn search_albums(&self, query: &str) -> Result<Vec<Album>, rusqlite::Error> {
        let pattern = format!("%{}%", query);
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist, artist_id, year, art_uri, song_count FROM albums \
             WHERE title LIKE ?1 OR artist LIKE ?1 LIMIT 20",
        )?;
        let album_iter = stmt.query_map(params![pattern], |row| {
            Ok(Album {
                id: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
                artist_id: row.get(3)?,
                year: row.get(4)?,
                art_uri: row.get(5)?,
                song_count: row.get(6)?,
            })
        })?;
        let mut albums = Vec::new();
        for album in album_iter {
            albums.push(album?);
        }
        Ok(albums)
    }

    pub fn get_all_artists(&self) -> Result<Vec<Artist>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, album_count, song_count FROM artists ORDER BY name ASC",
        )?;
        let artist_iter = stmt.query_map([], |row| {
            Ok(Artist {
                id: row.get(0)?,
                name: row.get(1)?,
                album_count: row.get(2)?,
                song_count: row.get(3)?,
            })
        })?;
        let mut artists = Vec::new();
        for artist in artist_iter {
            artists.push(artist?);
        }
        Ok(artists)
    }

    pub fn search_artists(&self, query: &str) -> Result<Vec<Artist>, rusqlite::Error> {
        let pattern = format!("%{}%", query);
        let mut stmt = self.conn.prepare(
            "SELECT id, name, album_count, song_count FROM artists WHERE name LIKE ?1 LIMIT 20",
        )?;
        let artist_iter = stmt.query_map(params![pattern], |row| {
            Ok(Artist {
                id: row.get(0)?,
                name: row.get(1)?,
                album_count: row.get(2)?,
                song_count: row.get(3)?,
            })
        })?;
        let mut artists = Vec::new();
        for artist in artist_iter {
            artists.push(artist?);
        }
        Ok(artists)
    }

    pub fn get_all_genres(&self) -> Result<Vec<Genre>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, song_count FROM genres ORDER BY name ASC")?;
        let genre_iter = stmt.query_map([], |row| {
            Ok(Genre {
                id: row.get(0)?,
                name: row.get(1)?,
                song_count: row.get(2)?,
            })
        })?;
        let mut genres = Vec::new();
        for genre in genre_iter {
            genres.push(genre?);
        }
        Ok(genres)
    }

    pub fn count_songs(&self) -> Result<usize, rusqlite::Error> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn create_playlist(&self, name: &str) -> Result<PlaylistInfo, rusqlite::Error> {
        let playlist = PlaylistInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Self::unix_now_secs(),
        };
        self.conn.execute(
            "INSERT INTO playlists (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![playlist.id, playlist.name, playlist.created_at],
        )?;
        Ok(playlist)
    }

    pub fn rename_playlist(&self, id: &str, name: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE playlists SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        Ok(())
    }

    pub fn delete_playlist(&mut self, id: &str) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM playlist_songs WHERE playlist_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        tx.commit()
    }

    pub fn get_all_playlists(&self) -> Result<Vec<PlaylistInfo>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM playlists ORDER BY created_at DESC")?;
        let playlist_iter = stmt.query_map([], |row| {
            Ok(PlaylistInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut playlists = Vec::new();
        for playlist in playlist_iter {
            playlists.push(playlist?);
        }
        Ok(playlists)
    }

    /// Appends a song at the end of a playlist. Re-adding an existing song
    /// replaces its entry and moves it to the end.
    pub fn add_song_to_playlist(
        &mut self,
        playlist_id: &str,
        song_id: i64,
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        let max_position: Option<i64> = tx.query_row(
            "SELECT MAX(position) FROM playlist_songs WHERE playlist_id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO playlist_songs (playlist_id, song_id, position) \
             VALUES (?1, ?2, ?3)",
            params![playlist_id, song_id, max_position.unwrap_or(-1) + 1],
        )?;
        tx.commit()
    }

    pub fn remove_song_from_playlist(
        &self,
        playlist_id: &str,
        song_id: i64,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2",
            params![playlist_id, song_id],
        )?;
        Ok(())
    }

    pub fn get_playlist_songs(&self, playlist_id: &str) -> Result<Vec<Song>, rusqlite::Error> {
        self.collect_songs(
            "SELECT s.id, s.title, s.artist, s.album, s.album_id, s.artist_id, s.duration_ms, \
             s.path, s.track_number, s.year, s.genre, s.date_added, s.art_uri, s.folder_path, \
             s.size_bytes FROM songs s INNER JOIN playlist_songs ps ON s.id = ps.song_id \
             WHERE ps.playlist_id = ?1 ORDER BY ps.position ASC",
            &[&playlist_id],
        )
    }

    pub fn add_blacklisted_folder(&self, path: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blacklisted_folders (path) VALUES (?1)",
            params![path],
        )?;
        Ok(())
    }

    pub fn remove_blacklisted_folder(&self, path: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM blacklisted_folders WHERE path = ?1",
            params![path],
        )?;
        Ok(())
    }

    pub fn get_blacklisted_folders(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT path FROM blacklisted_folders")?;
        let path_iter = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for path in path_iter {
            paths.push(path?);
        }
        Ok(paths)
    }
}
