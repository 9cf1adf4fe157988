//! Playback session runtime component.
//!
//! Mirrors the out-of-process playback engine as observable bus state,
//! bounds playback failures to a single track by auto-advancing, and drives
//! the timed scrobble-submission protocol. All state writes happen on the
//! manager's own loop so observable updates never race each other.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::playback_engine::PlaybackEngine;
use crate::protocol::{
    EngineErrorKind, EngineEvent, Message, PlaybackMessage, Song, TransportItem,
};
use crate::scrobbler::ScrobbleService;

const POSITION_TICK_INTERVAL: Duration = Duration::from_millis(300);
const MIN_SCROBBLE_DELAY_MS: u64 = 30_000;

/// Delay before a track may be scrobbled: half the duration, never below the
/// floor; the floor alone when the duration is unknown.
fn scrobble_threshold_ms(duration_ms: u64, floor_ms: u64) -> u64 {
    if duration_ms > 0 {
        floor_ms.max(duration_ms / 2)
    } else {
        floor_ms
    }
}

fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

/// Background loop publishing position-refresh ticks while playing. The
/// engine does not push position continuously, so this is the only
/// time-based polling in the system.
struct PositionTicker {
    stop: Arc<AtomicBool>,
}

impl PositionTicker {
    fn start(bus_producer: Sender<Message>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let _ = bus_producer.send(Message::Engine(EngineEvent::Tick));
                thread::sleep(POSITION_TICK_INTERVAL);
            }
        });
        Self { stop }
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Coordinates the engine connection, observable playback state, and the
/// per-track scrobble session.
pub struct PlaybackSessionManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    engine: Box<dyn PlaybackEngine>,
    connected: bool,
    scrobbler: Arc<dyn ScrobbleService>,
    playing: bool,
    current: Option<TransportItem>,
    error_text: Option<String>,
    ticker: Option<PositionTicker>,
    /// Bumped on every cancellation point; a firing scrobble task only
    /// submits when its captured token is still current.
    scrobble_generation: Arc<AtomicU64>,
    scrobble_cancel: Option<mpsc::Sender<()>>,
    scrobble_floor_ms: u64,
}

impl PlaybackSessionManager {
    /// Creates a manager bound to bus channels, an engine, and a scrobble
    /// service.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        engine: Box<dyn PlaybackEngine>,
        scrobbler: Arc<dyn ScrobbleService>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            engine,
            connected: false,
            scrobbler,
            playing: false,
            current: None,
            error_text: None,
            ticker: None,
            scrobble_generation: Arc::new(AtomicU64::new(0)),
            scrobble_cancel: None,
            scrobble_floor_ms: MIN_SCROBBLE_DELAY_MS,
        }
    }

    fn publish(&self, message: PlaybackMessage) {
        let _ = self.bus_producer.send(Message::Playback(message));
    }

    fn connect(&mut self) {
        match self.engine.bind(self.bus_producer.clone()) {
            Ok(()) => {
                info!("Playback engine bound");
                self.connected = true;
                self.resync_from_engine();
            }
            Err(err) => {
                warn!("Playback engine bind failed: {}", err);
                self.connected = false;
            }
        }
    }

    /// Republishes the engine's definitive state instead of assuming local
    /// state survived an engine restart.
    fn resync_from_engine(&mut self) {
        let snapshot = self.engine.snapshot();
        self.playing = snapshot.playing;
        self.current = snapshot.current.clone();
        self.publish(PlaybackMessage::PlayingChanged(snapshot.playing));
        self.publish(PlaybackMessage::CurrentTrackChanged {
            item: snapshot.current,
            queue_index: snapshot.queue_index,
        });
        self.publish(PlaybackMessage::RepeatModeChanged(snapshot.repeat_mode));
        self.publish(PlaybackMessage::ShuffleChanged(snapshot.shuffle));
        self.publish(PlaybackMessage::PositionChanged {
            position_ms: snapshot.position_ms,
            duration_ms: snapshot.duration_ms,
        });
        self.publish(PlaybackMessage::QueueChanged {
            items: snapshot.queue,
            index: snapshot.queue_index,
        });
        if snapshot.playing {
            self.start_ticker();
        } else {
            self.stop_ticker();
        }
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        self.ticker = Some(PositionTicker::start(self.bus_producer.clone()));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    fn cancel_scrobble(&mut self) {
        self.scrobble_generation.fetch_add(1, Ordering::SeqCst);
        self.scrobble_cancel = None;
    }

    /// Fires now-playing immediately, then schedules the scrobble for
    /// `max(floor, duration / 2)`. Artist and title are mandatory remote
    /// fields; tracks missing either never start a session.
    fn start_scrobble_session(&mut self, item: &TransportItem) {
        let artist = item.artist.trim().to_string();
        let title = item.title.trim().to_string();
        if artist.is_empty() || title.is_empty() {
            debug!("Skipping scrobble session for track without artist/title");
            return;
        }
        let album = Some(item.album.trim().to_string()).filter(|album| !album.is_empty());
        let duration_ms = self.engine.duration_ms();
        let duration_sec = (duration_ms / 1000) as i64;
        let started_at = unix_now_secs();
        let threshold_ms = scrobble_threshold_ms(duration_ms, self.scrobble_floor_ms);

        let token = self.scrobble_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.scrobble_generation);
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        self.scrobble_cancel = Some(cancel_tx);

        let scrobbler = Arc::clone(&self.scrobbler);
        thread::spawn(move || {
            scrobbler.now_playing(&artist, &title, album.as_deref(), duration_sec);
            match cancel_rx.recv_timeout(Duration::from_millis(threshold_ms)) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if generation.load(Ordering::SeqCst) == token {
                        scrobbler.submit(
                            &artist,
                            &title,
                            album.as_deref(),
                            started_at,
                            duration_sec,
                        );
                    }
                }
                // Explicit cancellation or the manager dropped the channel.
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            }
        });
    }

    fn error_reason(kind: EngineErrorKind) -> &'static str {
        match kind {
            EngineErrorKind::FileNotFound => "File not found",
            EngineErrorKind::NoPermission => "No permission to read file",
            EngineErrorKind::UnsupportedFormat => "Unsupported format",
            EngineErrorKind::Network => "Network error",
            EngineErrorKind::Other => "Playback error",
        }
    }

    fn handle_player_error(&mut self, kind: EngineErrorKind) {
        let title = self
            .current
            .as_ref()
            .map(|item| item.title.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let message = format!("Can't play \"{}\": {}", title, Self::error_reason(kind));
        warn!("{}", message);
        self.error_text = Some(message.clone());
        self.publish(PlaybackMessage::PlaybackErrorChanged(Some(message)));
        // Bound the blast radius to one track.
        if self.engine.has_next() {
            self.engine.skip_next();
            self.engine.play();
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PlayingChanged(playing) => {
                self.playing = playing;
                self.publish(PlaybackMessage::PlayingChanged(playing));
                if playing {
                    self.start_ticker();
                } else {
                    self.stop_ticker();
                    // A paused listen is not continuous; the pending scrobble
                    // dies with it.
                    self.cancel_scrobble();
                }
            }
            EngineEvent::TrackTransition(item) => {
                self.current = item.clone();
                self.cancel_scrobble();
                self.publish(PlaybackMessage::CurrentTrackChanged {
                    item: item.clone(),
                    queue_index: self.engine.current_index(),
                });
                if let Some(item) = item {
                    self.start_scrobble_session(&item);
                }
            }
            EngineEvent::RepeatModeChanged(mode) => {
                self.publish(PlaybackMessage::RepeatModeChanged(mode));
            }
            EngineEvent::ShuffleChanged(enabled) => {
                self.publish(PlaybackMessage::ShuffleChanged(enabled));
            }
            EngineEvent::TimelineChanged => {
                let snapshot = self.engine.snapshot();
                self.publish(PlaybackMessage::QueueChanged {
                    items: snapshot.queue,
                    index: snapshot.queue_index,
                });
                self.publish(PlaybackMessage::PositionChanged {
                    position_ms: snapshot.position_ms,
                    duration_ms: snapshot.duration_ms,
                });
            }
            EngineEvent::Tick => {
                if self.connected {
                    self.publish(PlaybackMessage::PositionChanged {
                        position_ms: self.engine.position_ms(),
                        duration_ms: self.engine.duration_ms(),
                    });
                }
            }
            EngineEvent::PlayerError(kind) => self.handle_player_error(kind),
        }
    }

    fn handle_playback_message(&mut self, message: PlaybackMessage) {
        match message {
            PlaybackMessage::Play => {
                if self.connected {
                    self.engine.play();
                }
            }
            PlaybackMessage::Pause => {
                if self.connected {
                    self.engine.pause();
                }
            }
            PlaybackMessage::SeekTo(position_ms) => {
                if self.connected {
                    self.engine.seek_to(position_ms);
                }
            }
            PlaybackMessage::SkipNext => {
                if self.connected {
                    self.engine.skip_next();
                }
            }
            PlaybackMessage::SkipPrevious => {
                if self.connected {
                    self.engine.skip_previous();
                }
            }
            PlaybackMessage::SkipToQueueItem(index) => {
                if self.connected {
                    self.engine.skip_to(index);
                }
            }
            PlaybackMessage::SetRepeatMode(mode) => {
                if self.connected {
                    self.engine.set_repeat_mode(mode);
                }
                self.publish(PlaybackMessage::RepeatModeChanged(mode));
            }
            PlaybackMessage::SetShuffle(enabled) => {
                if self.connected {
                    self.engine.set_shuffle(enabled);
                }
                self.publish(PlaybackMessage::ShuffleChanged(enabled));
            }
            PlaybackMessage::ReplaceQueue { songs, start_index } => {
                self.replace_queue(&songs, start_index);
            }
            PlaybackMessage::Append(song) => {
                if self.connected {
                    self.engine.append(TransportItem::from_song(&song));
                }
            }
            PlaybackMessage::InsertNext(song) => {
                if self.connected {
                    let insert_index = self.engine.current_index() + 1;
                    self.engine
                        .insert_at(insert_index, TransportItem::from_song(&song));
                }
            }
            PlaybackMessage::ClearError => {
                self.error_text = None;
                self.publish(PlaybackMessage::PlaybackErrorChanged(None));
            }
            // Notifications published by this manager loop back on the bus.
            _ => {}
        }
    }

    /// Queue mutations always pass through the engine so the next event or
    /// resync reflects the true definitive state.
    fn replace_queue(&mut self, songs: &[Song], start_index: usize) {
        if !self.connected {
            self.connect();
        }
        if !self.connected {
            warn!("Cannot replace queue: playback engine unavailable");
            return;
        }
        let items: Vec<TransportItem> = songs.iter().map(TransportItem::from_song).collect();
        self.engine.set_queue(items, start_index);
    }

    /// Starts the blocking event loop. The engine connection is attempted
    /// once up front; a failed bind is retried by the next queue replace.
    pub fn run(&mut self) {
        self.connect();
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Playback(message)) => self.handle_playback_message(message),
                Ok(Message::Engine(event)) => self.handle_engine_event(event),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "PlaybackSessionManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        self.stop_ticker();
        self.cancel_scrobble();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

    use super::{scrobble_threshold_ms, PlaybackSessionManager};
    use crate::playback_engine::{EngineSnapshot, PlaybackEngine};
    use crate::protocol::{
        EngineErrorKind, EngineEvent, Message, PlaybackMessage, RepeatMode, Song, TransportItem,
    };
    use crate::scrobbler::ScrobbleService;

    #[derive(Default)]
    struct FakeEngineState {
        bound: bool,
        bind_calls: usize,
        bind_should_fail: bool,
        queue: Vec<TransportItem>,
        index: usize,
        playing: bool,
        repeat_mode: RepeatMode,
        shuffle: bool,
        position_ms: u64,
        duration_ms: u64,
        set_queue_calls: usize,
        play_calls: usize,
        skip_next_calls: usize,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        state: Arc<Mutex<FakeEngineState>>,
    }

    impl FakeEngine {
        fn lock(&self) -> std::sync::MutexGuard<'_, FakeEngineState> {
            self.state.lock().expect("fake engine lock poisoned")
        }
    }

    impl PlaybackEngine for FakeEngine {
        fn bind(&mut self, _events: Sender<Message>) -> Result<(), String> {
            let mut state = self.lock();
            state.bind_calls += 1;
            if state.bind_should_fail {
                return Err("engine not running".to_string());
            }
            state.bound = true;
            Ok(())
        }

        fn snapshot(&self) -> EngineSnapshot {
            let state = self.lock();
            EngineSnapshot {
                playing: state.playing,
                current: state.queue.get(state.index).cloned(),
                repeat_mode: state.repeat_mode,
                shuffle: state.shuffle,
                position_ms: state.position_ms,
                duration_ms: state.duration_ms,
                queue: state.queue.clone(),
                queue_index: state.index,
            }
        }

        fn set_queue(&mut self, items: Vec<TransportItem>, start_index: usize) {
            let mut state = self.lock();
            state.queue = items;
            state.index = start_index;
            state.playing = true;
            state.set_queue_calls += 1;
        }

        fn append(&mut self, item: TransportItem) {
            self.lock().queue.push(item);
        }

        fn insert_at(&mut self, index: usize, item: TransportItem) {
            let mut state = self.lock();
            let index = index.min(state.queue.len());
            state.queue.insert(index, item);
        }

        fn play(&mut self) {
            let mut state = self.lock();
            state.playing = true;
            state.play_calls += 1;
        }

        fn pause(&mut self) {
            self.lock().playing = false;
        }

        fn seek_to(&mut self, position_ms: u64) {
            self.lock().position_ms = position_ms;
        }

        fn skip_next(&mut self) {
            let mut state = self.lock();
            state.skip_next_calls += 1;
            if state.index + 1 < state.queue.len() {
                state.index += 1;
            }
        }

        fn skip_previous(&mut self) {
            let mut state = self.lock();
            state.index = state.index.saturating_sub(1);
        }

        fn skip_to(&mut self, index: usize) {
            self.lock().index = index;
        }

        fn set_repeat_mode(&mut self, mode: RepeatMode) {
            self.lock().repeat_mode = mode;
        }

        fn set_shuffle(&mut self, enabled: bool) {
            self.lock().shuffle = enabled;
        }

        fn position_ms(&self) -> u64 {
            self.lock().position_ms
        }

        fn duration_ms(&self) -> u64 {
            self.lock().duration_ms
        }

        fn has_next(&self) -> bool {
            let state = self.lock();
            state.index + 1 < state.queue.len()
        }

        fn current_index(&self) -> usize {
            self.lock().index
        }
    }

    #[derive(Default)]
    struct RecordingScrobbleService {
        now_playing_calls: Mutex<Vec<(String, String)>>,
        scrobbles: Mutex<Vec<(String, String, i64)>>,
    }

    impl ScrobbleService for RecordingScrobbleService {
        fn now_playing(&self, artist: &str, track: &str, _album: Option<&str>, _duration: i64) {
            self.now_playing_calls
                .lock()
                .expect("lock poisoned")
                .push((artist.to_string(), track.to_string()));
        }

        fn submit(
            &self,
            artist: &str,
            track: &str,
            _album: Option<&str>,
            timestamp: i64,
            _duration: i64,
        ) {
            self.scrobbles
                .lock()
                .expect("lock poisoned")
                .push((artist.to_string(), track.to_string(), timestamp));
        }

        fn fetch_album_art(&self, _artist: &str, _album: &str) -> Option<String> {
            None
        }
    }

    struct PlaybackHarness {
        bus_sender: Sender<Message>,
        receiver: Receiver<Message>,
        engine: FakeEngine,
        service: Arc<RecordingScrobbleService>,
    }

    impl PlaybackHarness {
        fn new(setup: impl FnOnce(&FakeEngine)) -> Self {
            let (bus_sender, _) = broadcast::channel(4096);
            let engine = FakeEngine::default();
            setup(&engine);
            let service = Arc::new(RecordingScrobbleService::default());

            let receiver = bus_sender.subscribe();
            let mut manager = PlaybackSessionManager::new(
                bus_sender.subscribe(),
                bus_sender.clone(),
                Box::new(engine.clone()),
                service.clone(),
            );
            manager.scrobble_floor_ms = 50;
            thread::spawn(move || manager.run());

            Self {
                bus_sender,
                receiver,
                engine,
                service,
            }
        }

        fn send(&self, message: Message) {
            self.bus_sender
                .send(message)
                .expect("failed to send message to bus");
        }
    }

    fn wait_for_message<F>(
        receiver: &mut Receiver<Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
        let start = Instant::now();
        while !predicate() {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected state");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn item(id: i64, title: &str, artist: &str) -> TransportItem {
        TransportItem {
            id,
            uri: format!("/music/{}.mp3", title),
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
            art_uri: None,
        }
    }

    fn song(id: i64, title: &str) -> Song {
        Song {
            id,
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_id: 10,
            artist_id: 20,
            duration_ms: 180_000,
            path: format!("/music/{}.mp3", title),
            track_number: 1,
            year: 2020,
            genre: String::new(),
            date_added: 1_700_000_000,
            art_uri: None,
            folder_path: "/music".to_string(),
            size_bytes: 4_000_000,
        }
    }

    #[test]
    fn test_scrobble_threshold_is_half_duration_with_floor() {
        assert_eq!(scrobble_threshold_ms(240_000, 30_000), 120_000);
        assert_eq!(scrobble_threshold_ms(10_000, 30_000), 30_000);
        assert_eq!(scrobble_threshold_ms(0, 30_000), 30_000);
        assert_eq!(scrobble_threshold_ms(59_999, 30_000), 30_000);
        assert_eq!(scrobble_threshold_ms(60_002, 30_000), 30_001);
    }

    #[test]
    fn test_resync_on_connect_publishes_engine_state() {
        let mut harness = PlaybackHarness::new(|engine| {
            let mut state = engine.lock();
            state.queue = vec![item(1, "Alpha", "Artist")];
            state.index = 0;
            state.repeat_mode = RepeatMode::All;
            state.shuffle = true;
        });

        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::RepeatModeChanged(RepeatMode::All))
            )
        });
        let message =
            wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
                matches!(message, Message::Playback(PlaybackMessage::QueueChanged { .. }))
            });
        let Message::Playback(PlaybackMessage::QueueChanged { items, index }) = message else {
            panic!("expected QueueChanged message");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_replace_queue_routes_through_engine() {
        let mut harness = PlaybackHarness::new(|_| {});

        harness.send(Message::Playback(PlaybackMessage::ReplaceQueue {
            songs: vec![song(1, "Alpha"), song(2, "Bravo")],
            start_index: 1,
        }));

        let engine = harness.engine.clone();
        wait_until(Duration::from_secs(1), || engine.lock().set_queue_calls == 1);
        assert_eq!(harness.engine.lock().queue.len(), 2);
        assert_eq!(harness.engine.lock().index, 1);

        // Queue state is only published once the engine reports the change;
        // the connect-time resync published an empty queue before this.
        harness.send(Message::Engine(EngineEvent::TimelineChanged));
        let message =
            wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    Message::Playback(PlaybackMessage::QueueChanged { items, .. })
                        if !items.is_empty()
                )
            });
        let Message::Playback(PlaybackMessage::QueueChanged { items, index }) = message else {
            panic!("expected QueueChanged message");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(index, 1);
    }

    #[test]
    fn test_replace_queue_retries_bind_after_initial_failure() {
        let harness = PlaybackHarness::new(|engine| {
            engine.lock().bind_should_fail = true;
        });

        // Wait for the initial connect to fail, then let binds succeed.
        let engine = harness.engine.clone();
        wait_until(Duration::from_secs(1), || engine.lock().bind_calls == 1);
        assert!(!harness.engine.lock().bound);
        harness.engine.lock().bind_should_fail = false;

        harness.send(Message::Playback(PlaybackMessage::ReplaceQueue {
            songs: vec![song(1, "Alpha")],
            start_index: 0,
        }));

        let engine = harness.engine.clone();
        wait_until(Duration::from_secs(1), || {
            let state = engine.lock();
            state.bound && state.set_queue_calls == 1
        });
    }

    #[test]
    fn test_player_error_with_next_track_auto_advances() {
        let mut harness = PlaybackHarness::new(|engine| {
            let mut state = engine.lock();
            state.queue = vec![item(1, "Alpha", "Artist"), item(2, "Bravo", "Artist")];
            state.index = 0;
        });

        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            1, "Alpha", "",
        )))));
        harness.send(Message::Engine(EngineEvent::PlayerError(
            EngineErrorKind::FileNotFound,
        )));

        let message =
            wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    Message::Playback(PlaybackMessage::PlaybackErrorChanged(Some(_)))
                )
            });
        let Message::Playback(PlaybackMessage::PlaybackErrorChanged(Some(text))) = message else {
            panic!("expected PlaybackErrorChanged message");
        };
        assert!(text.contains("File not found"));
        assert!(text.contains("Alpha"));

        let engine = harness.engine.clone();
        wait_until(Duration::from_secs(1), || {
            let state = engine.lock();
            state.skip_next_calls == 1 && state.play_calls == 1 && state.index == 1
        });
    }

    #[test]
    fn test_player_error_without_next_track_surfaces_error_only() {
        let mut harness = PlaybackHarness::new(|engine| {
            let mut state = engine.lock();
            state.queue = vec![item(1, "Alpha", "Artist")];
            state.index = 0;
        });

        harness.send(Message::Engine(EngineEvent::PlayerError(
            EngineErrorKind::UnsupportedFormat,
        )));

        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::PlaybackErrorChanged(Some(_)))
            )
        });
        thread::sleep(Duration::from_millis(50));
        let state = harness.engine.lock();
        assert_eq!(state.skip_next_calls, 0);
        assert_eq!(state.play_calls, 0);
    }

    #[test]
    fn test_track_transition_scrobbles_after_threshold() {
        let harness = PlaybackHarness::new(|_| {});

        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            1, "Alpha", "Artist",
        )))));

        let service = harness.service.clone();
        wait_until(Duration::from_secs(2), || {
            !service.scrobbles.lock().expect("lock poisoned").is_empty()
        });
        let now_playing = harness
            .service
            .now_playing_calls
            .lock()
            .expect("lock poisoned");
        assert_eq!(now_playing.len(), 1);
        assert_eq!(now_playing[0], ("Artist".to_string(), "Alpha".to_string()));
        let scrobbles = harness.service.scrobbles.lock().expect("lock poisoned");
        assert_eq!(scrobbles.len(), 1);
        assert_eq!(scrobbles[0].0, "Artist");
        assert_eq!(scrobbles[0].1, "Alpha");
        assert!(scrobbles[0].2 > 0);
    }

    #[test]
    fn test_pause_before_threshold_cancels_scrobble() {
        let harness = PlaybackHarness::new(|engine| {
            // Long enough that the pause always lands before the threshold.
            engine.lock().duration_ms = 2_000;
        });

        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            1, "Alpha", "Artist",
        )))));
        let service = harness.service.clone();
        wait_until(Duration::from_secs(1), || {
            !service
                .now_playing_calls
                .lock()
                .expect("lock poisoned")
                .is_empty()
        });

        harness.send(Message::Engine(EngineEvent::PlayingChanged(false)));
        thread::sleep(Duration::from_millis(1_300));
        assert!(harness
            .service
            .scrobbles
            .lock()
            .expect("lock poisoned")
            .is_empty());
    }

    #[test]
    fn test_new_transition_cancels_previous_scrobble_session() {
        let harness = PlaybackHarness::new(|engine| {
            engine.lock().duration_ms = 2_000;
        });

        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            1, "Alpha", "Artist",
        )))));
        let service = harness.service.clone();
        wait_until(Duration::from_secs(1), || {
            !service
                .now_playing_calls
                .lock()
                .expect("lock poisoned")
                .is_empty()
        });

        // Shorten the threshold for the replacement track only.
        harness.engine.lock().duration_ms = 0;
        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            2, "Bravo", "Artist",
        )))));

        wait_until(Duration::from_secs(2), || {
            !service.scrobbles.lock().expect("lock poisoned").is_empty()
        });
        thread::sleep(Duration::from_millis(1_300));
        let scrobbles = harness.service.scrobbles.lock().expect("lock poisoned");
        assert_eq!(scrobbles.len(), 1);
        assert_eq!(scrobbles[0].1, "Bravo");
    }

    #[test]
    fn test_track_without_artist_never_starts_scrobble_session() {
        let harness = PlaybackHarness::new(|_| {});

        harness.send(Message::Engine(EngineEvent::TrackTransition(Some(item(
            1, "Alpha", "  ",
        )))));
        thread::sleep(Duration::from_millis(250));
        assert!(harness
            .service
            .now_playing_calls
            .lock()
            .expect("lock poisoned")
            .is_empty());
        assert!(harness
            .service
            .scrobbles
            .lock()
            .expect("lock poisoned")
            .is_empty());
    }

    #[test]
    fn test_set_repeat_mode_updates_engine_and_publishes() {
        let mut harness = PlaybackHarness::new(|_| {});

        harness.send(Message::Playback(PlaybackMessage::SetRepeatMode(
            RepeatMode::One,
        )));
        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::RepeatModeChanged(RepeatMode::One))
            )
        });
        assert_eq!(harness.engine.lock().repeat_mode, RepeatMode::One);
    }

    #[test]
    fn test_clear_error_publishes_dismissal() {
        let mut harness = PlaybackHarness::new(|_| {});

        harness.send(Message::Engine(EngineEvent::PlayerError(
            EngineErrorKind::Network,
        )));
        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::PlaybackErrorChanged(Some(_)))
            )
        });

        harness.send(Message::Playback(PlaybackMessage::ClearError));
        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::PlaybackErrorChanged(None))
            )
        });
    }

    #[test]
    fn test_insert_next_lands_after_current_index() {
        let harness = PlaybackHarness::new(|engine| {
            let mut state = engine.lock();
            state.queue = vec![item(1, "Alpha", "Artist"), item(2, "Bravo", "Artist")];
            state.index = 0;
        });

        harness.send(Message::Playback(PlaybackMessage::InsertNext(song(
            3, "Charlie",
        ))));

        let engine = harness.engine.clone();
        wait_until(Duration::from_secs(1), || engine.lock().queue.len() == 3);
        let state = harness.engine.lock();
        assert_eq!(state.queue[1].title, "Charlie");
    }
}
