//! Folder hierarchy browser.
//!
//! Presents the library's flat folder-path strings as a navigable tree;
//! nothing here touches the filesystem. The browser only holds navigation
//! state (current path + breadcrumb trail); the song list is supplied per
//! call and playback hand-off goes through the queue-replace bus message.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use tokio::sync::broadcast::Sender;

use crate::protocol::{Message, PlaybackMessage, Song};

/// One immediate child folder of the browsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub path: String,
    pub name: String,
    /// Songs directly inside this folder.
    pub song_count: usize,
    /// Immediate subfolders of this folder.
    pub sub_folder_count: usize,
    /// Songs anywhere under this folder.
    pub total_song_count: usize,
}

/// Breadcrumb trail entry; `path == None` marks the synthetic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    pub path: Option<String>,
}

pub struct FolderBrowser {
    bus_producer: Sender<Message>,
    current_path: Option<String>,
    breadcrumbs: Vec<Breadcrumb>,
}

impl FolderBrowser {
    pub fn new(bus_producer: Sender<Message>) -> Self {
        Self {
            bus_producer,
            current_path: None,
            breadcrumbs: vec![Breadcrumb {
                label: "Root".to_string(),
                path: None,
            }],
        }
    }

    /// Currently browsed path; `None` means the virtual root.
    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    pub fn breadcrumbs(&self) -> &[Breadcrumb] {
        &self.breadcrumbs
    }

    /// Longest common path prefix across all folder paths, found by
    /// truncating the candidate at its last separator until every path
    /// starts with it.
    pub fn compute_root(songs: &[Song]) -> String {
        let paths: Vec<&str> = songs
            .iter()
            .map(|song| song.folder_path.as_str())
            .filter(|path| !path.is_empty())
            .collect();
        let Some(first) = paths.first() else {
            return String::new();
        };
        let mut common = first.to_string();
        for path in &paths {
            while !path.starts_with(&common) {
                match common.rfind('/') {
                    Some(index) => common.truncate(index),
                    None => {
                        common.clear();
                        break;
                    }
                }
            }
        }
        common
    }

    /// Immediate subfolders of the current path (or the inferred root),
    /// with direct/total song counts and a subfolder count, accumulated in
    /// one pass over all songs.
    pub fn sub_folders(&self, songs: &[Song]) -> Vec<FolderEntry> {
        if songs.is_empty() {
            return Vec::new();
        }
        let root = self
            .current_path
            .clone()
            .unwrap_or_else(|| Self::compute_root(songs));
        let prefix = format!("{}/", root);

        let mut sub_segments: HashMap<String, HashSet<String>> = HashMap::new();
        let mut direct_counts: HashMap<String, usize> = HashMap::new();
        let mut total_counts: HashMap<String, usize> = HashMap::new();

        for song in songs {
            // Songs sitting directly in the root have an empty suffix and
            // contribute no child entry.
            let Some(relative) = song.folder_path.strip_prefix(&prefix) else {
                continue;
            };
            let Some(segment) = relative.split('/').next().filter(|s| !s.is_empty()) else {
                continue;
            };
            let child_path = format!("{}{}", prefix, segment);
            sub_segments.entry(child_path.clone()).or_default();
            *total_counts.entry(child_path.clone()).or_insert(0) += 1;
            if song.folder_path == child_path {
                *direct_counts.entry(child_path.clone()).or_insert(0) += 1;
            }
            let after_segment = relative[segment.len()..].trim_start_matches('/');
            if let Some(sub_segment) = after_segment.split('/').next().filter(|s| !s.is_empty()) {
                sub_segments
                    .entry(child_path)
                    .or_default()
                    .insert(sub_segment.to_string());
            }
        }

        let mut entries: Vec<FolderEntry> = sub_segments
            .into_iter()
            .map(|(path, subs)| {
                let name = path.rsplit('/').next().unwrap_or_default().to_string();
                FolderEntry {
                    name,
                    song_count: direct_counts.get(&path).copied().unwrap_or(0),
                    sub_folder_count: subs.len(),
                    total_song_count: total_counts.get(&path).copied().unwrap_or(0),
                    path,
                }
            })
            .collect();
        entries.sort_by(|left, right| left.name.cmp(&right.name));
        entries
    }

    /// Songs sitting exactly at the current path, title order.
    pub fn songs_in_folder(&self, songs: &[Song]) -> Vec<Song> {
        let Some(current) = self.current_path.as_deref() else {
            return Vec::new();
        };
        let mut direct: Vec<Song> = songs
            .iter()
            .filter(|song| song.folder_path == current)
            .cloned()
            .collect();
        direct.sort_by(|left, right| left.title.cmp(&right.title));
        direct
    }

    /// All songs anywhere under the current path.
    pub fn total_songs_count(&self, songs: &[Song]) -> usize {
        let Some(current) = self.current_path.as_deref() else {
            return 0;
        };
        let prefix = format!("{}/", current);
        songs
            .iter()
            .filter(|song| song.folder_path == current || song.folder_path.starts_with(&prefix))
            .count()
    }

    /// Moves into `path`. If the path is already on the trail the trail is
    /// truncated to it, so going back and forward again never duplicates
    /// entries.
    pub fn navigate_to(&mut self, path: &str, label: &str) {
        self.current_path = Some(path.to_string());
        if let Some(existing) = self
            .breadcrumbs
            .iter()
            .position(|crumb| crumb.path.as_deref() == Some(path))
        {
            self.breadcrumbs.truncate(existing + 1);
        } else {
            self.breadcrumbs.push(Breadcrumb {
                label: label.to_string(),
                path: Some(path.to_string()),
            });
        }
    }

    pub fn navigate_to_root(&mut self) {
        self.current_path = None;
        self.breadcrumbs = vec![Breadcrumb {
            label: "Root".to_string(),
            path: None,
        }];
    }

    pub fn pop_back(&mut self) {
        if self.breadcrumbs.len() <= 1 {
            return;
        }
        self.navigate_to_breadcrumb(self.breadcrumbs.len() - 2);
    }

    pub fn navigate_to_breadcrumb(&mut self, index: usize) {
        if index >= self.breadcrumbs.len() {
            return;
        }
        self.current_path = self.breadcrumbs[index].path.clone();
        self.breadcrumbs.truncate(index + 1);
    }

    fn subtree_songs(&self, songs: &[Song]) -> Option<Vec<Song>> {
        let current = self.current_path.as_deref()?;
        let prefix = format!("{}/", current);
        Some(
            songs
                .iter()
                .filter(|song| {
                    song.folder_path == current || song.folder_path.starts_with(&prefix)
                })
                .cloned()
                .collect(),
        )
    }

    fn replace_queue(&self, songs: Vec<Song>, start_index: usize) {
        let _ = self
            .bus_producer
            .send(Message::Playback(PlaybackMessage::ReplaceQueue {
                songs,
                start_index,
            }));
    }

    /// Plays the whole current subtree in title order.
    pub fn play_all(&self, songs: &[Song]) {
        let Some(mut subtree) = self.subtree_songs(songs) else {
            return;
        };
        if subtree.is_empty() {
            return;
        }
        subtree.sort_by(|left, right| left.title.cmp(&right.title));
        self.replace_queue(subtree, 0);
    }

    /// Plays the whole current subtree in random order.
    pub fn shuffle_all(&self, songs: &[Song]) {
        let Some(mut subtree) = self.subtree_songs(songs) else {
            return;
        };
        if subtree.is_empty() {
            return;
        }
        subtree.shuffle(&mut rand::rng());
        self.replace_queue(subtree, 0);
    }

    /// Plays one song with the folder's direct children as the queue.
    pub fn play_song(&self, songs: &[Song], song: &Song) {
        if self.current_path.is_none() {
            return;
        }
        let queue = self.songs_in_folder(songs);
        if queue.is_empty() {
            return;
        }
        let start_index = queue
            .iter()
            .position(|candidate| candidate.id == song.id)
            .unwrap_or(0);
        self.replace_queue(queue, start_index);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::{self, Receiver};

    use super::FolderBrowser;
    use crate::protocol::{Message, PlaybackMessage, Song};

    fn song(id: i64, title: &str, folder: &str) -> Song {
        Song {
            id,
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_id: 10,
            artist_id: 20,
            duration_ms: 180_000,
            path: format!("{}/{}.mp3", folder, title),
            track_number: 1,
            year: 2020,
            genre: String::new(),
            date_added: 1_700_000_000,
            art_uri: None,
            folder_path: folder.to_string(),
            size_bytes: 4_000_000,
        }
    }

    fn browser() -> (FolderBrowser, Receiver<Message>) {
        let (bus_sender, receiver) = broadcast::channel(64);
        (FolderBrowser::new(bus_sender), receiver)
    }

    fn recv_replace_queue(receiver: &mut Receiver<Message>) -> (Vec<Song>, usize) {
        match receiver.try_recv() {
            Ok(Message::Playback(PlaybackMessage::ReplaceQueue { songs, start_index })) => {
                (songs, start_index)
            }
            other => panic!("expected ReplaceQueue message, got {:?}", other),
        }
    }

    #[test]
    fn test_compute_root_finds_longest_common_prefix() {
        let songs = vec![
            song(1, "a", "/music/rock"),
            song(2, "b", "/music/rock"),
            song(3, "c", "/music/pop"),
        ];
        assert_eq!(FolderBrowser::compute_root(&songs), "/music");
    }

    #[test]
    fn test_compute_root_with_disjoint_paths_is_empty() {
        let songs = vec![song(1, "a", "/music/rock"), song(2, "b", "/backup/pop")];
        assert_eq!(FolderBrowser::compute_root(&songs), "");
    }

    #[test]
    fn test_sub_folder_counts_direct_total_and_subfolders() {
        let songs = vec![
            song(1, "a", "/music/rock"),
            song(2, "b", "/music/rock"),
            song(3, "c", "/music/rock/live"),
            song(4, "d", "/music/rock/live"),
        ];
        let (mut browser, _receiver) = browser();
        browser.navigate_to("/music", "music");

        let entries = browser.sub_folders(&songs);
        assert_eq!(entries.len(), 1);
        let rock = &entries[0];
        assert_eq!(rock.path, "/music/rock");
        assert_eq!(rock.name, "rock");
        assert_eq!(rock.song_count, 2);
        assert_eq!(rock.total_song_count, 4);
        assert_eq!(rock.sub_folder_count, 1);
    }

    #[test]
    fn test_sub_folders_use_inferred_root_when_unnavigated() {
        let songs = vec![
            song(1, "a", "/music/rock"),
            song(2, "b", "/music/rock/live"),
            song(3, "c", "/music/rock/studio"),
        ];
        let (browser, _receiver) = browser();

        // Root infers to /music/rock; its direct song produces no entry.
        let entries = browser.sub_folders(&songs);
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["live", "studio"]);
        assert_eq!(entries[0].song_count, 1);
        assert_eq!(entries[0].total_song_count, 1);
        assert_eq!(entries[0].sub_folder_count, 0);
    }

    #[test]
    fn test_navigate_to_existing_path_truncates_trail() {
        let (mut browser, _receiver) = browser();
        browser.navigate_to("/music", "music");
        browser.navigate_to("/music/rock", "rock");
        browser.navigate_to("/music/rock/live", "live");
        assert_eq!(browser.breadcrumbs().len(), 4);

        // Back then forward to the same place must not duplicate the entry.
        browser.navigate_to("/music", "music");
        assert_eq!(browser.breadcrumbs().len(), 2);
        assert_eq!(browser.current_path(), Some("/music"));
    }

    #[test]
    fn test_pop_back_returns_to_previous_crumb_and_root() {
        let (mut browser, _receiver) = browser();
        browser.navigate_to("/music", "music");
        browser.navigate_to("/music/rock", "rock");

        browser.pop_back();
        assert_eq!(browser.current_path(), Some("/music"));

        browser.pop_back();
        assert_eq!(browser.current_path(), None);
        assert_eq!(browser.breadcrumbs().len(), 1);

        // Popping at the root is a no-op.
        browser.pop_back();
        assert_eq!(browser.breadcrumbs().len(), 1);
    }

    #[test]
    fn test_songs_in_folder_lists_direct_children_only() {
        let songs = vec![
            song(1, "Bravo", "/music/rock"),
            song(2, "Alpha", "/music/rock"),
            song(3, "Deep", "/music/rock/live"),
        ];
        let (mut browser, _receiver) = browser();
        browser.navigate_to("/music/rock", "rock");

        let direct = browser.songs_in_folder(&songs);
        let titles: Vec<&str> = direct.iter().map(|song| song.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo"]);
        assert_eq!(browser.total_songs_count(&songs), 3);
    }

    #[test]
    fn test_play_all_queues_subtree_in_title_order() {
        let songs = vec![
            song(1, "Charlie", "/music/rock/live"),
            song(2, "Alpha", "/music/rock"),
            song(3, "Bravo", "/music/rock"),
            song(4, "Elsewhere", "/music/pop"),
        ];
        let (mut browser, mut receiver) = browser();
        browser.navigate_to("/music/rock", "rock");

        browser.play_all(&songs);

        let (queued, start_index) = recv_replace_queue(&mut receiver);
        let titles: Vec<&str> = queued.iter().map(|song| song.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo", "Charlie"]);
        assert_eq!(start_index, 0);
    }

    #[test]
    fn test_play_all_at_virtual_root_is_a_no_op() {
        let songs = vec![song(1, "Alpha", "/music/rock")];
        let (browser, mut receiver) = browser();

        browser.play_all(&songs);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_shuffle_all_queues_same_song_set() {
        let songs: Vec<Song> = (0..8)
            .map(|i| song(i, &format!("Song {}", i), "/music/rock"))
            .collect();
        let (mut browser, mut receiver) = browser();
        browser.navigate_to("/music/rock", "rock");

        browser.shuffle_all(&songs);

        let (queued, start_index) = recv_replace_queue(&mut receiver);
        assert_eq!(start_index, 0);
        let mut ids: Vec<i64> = queued.iter().map(|song| song.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<i64>>());
    }

    #[test]
    fn test_play_song_starts_at_its_position_in_direct_queue() {
        let songs = vec![
            song(1, "Bravo", "/music/rock"),
            song(2, "Alpha", "/music/rock"),
            song(3, "Deep", "/music/rock/live"),
        ];
        let (mut browser, mut receiver) = browser();
        browser.navigate_to("/music/rock", "rock");

        browser.play_song(&songs, &songs[0]);

        let (queued, start_index) = recv_replace_queue(&mut receiver);
        let titles: Vec<&str> = queued.iter().map(|song| song.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Bravo"]);
        assert_eq!(start_index, 1);
    }
}
