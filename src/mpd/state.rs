use tokio::sync::watch;
use tokio::time::Instant;

use crate::mpd::types::{PlaybackOptions, PlayerState, Seconds, Song, Status};

/// Snapshot of what the player is doing, published on a watch channel
/// whenever a status or song refresh lands.
#[derive(Debug, Clone)]
pub struct Playback {
    pub state: PlayerState,
    pub song: Option<Song>,
    pub options: PlaybackOptions,
    pub volume: Option<u8>,
    pub crossfade: u32,
    elapsed: Option<Seconds>,
    duration: Option<Seconds>,
    received_at: Instant,
}

impl Playback {
    fn empty() -> Playback {
        Playback {
            state: PlayerState::Stop,
            song: None,
            options: PlaybackOptions::default(),
            volume: None,
            crossfade: 0,
            elapsed: None,
            duration: None,
            received_at: Instant::now(),
        }
    }

    pub fn duration(&self) -> Option<Seconds> {
        self.duration
    }

    /// Current position in the track. While playing, the last reported
    /// position advances with wall time, clamped to the duration. In any
    /// other state the reported position is returned as-is.
    pub fn elapsed(&self) -> Option<Seconds> {
        let elapsed = self.elapsed?;

        if self.state != PlayerState::Play {
            return Some(elapsed);
        }

        let position = elapsed.0 + self.received_at.elapsed().as_secs_f64();

        Some(Seconds(match self.duration {
            Some(duration) => position.min(duration.0),
            None => position,
        }))
    }
}

#[derive(Clone)]
pub struct StateCache {
    tx: watch::Sender<Playback>,
}

impl StateCache {
    pub fn new() -> StateCache {
        let (tx, _) = watch::channel(Playback::empty());
        StateCache { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Playback> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Playback {
        self.tx.borrow().clone()
    }

    pub(crate) fn apply_status(&self, status: &Status) {
        let received_at = Instant::now();

        self.tx.send_modify(|playback| {
            playback.state = status.state;
            playback.options = status.options;
            playback.volume = status.volume;
            playback.crossfade = status.crossfade;
            playback.elapsed = status.elapsed;
            playback.duration = status.duration;
            playback.received_at = received_at;
        });
    }

    pub(crate) fn apply_song(&self, song: Option<Song>) {
        self.tx.send_modify(|playback| playback.song = song);
    }
}
