use std::convert::Infallible;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use derive_more::FromStr;

use crate::mpd::protocol::Attributes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id(String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Id {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(Id(s.to_string()))
    }
}

#[derive(Debug)]
pub struct Changed {
    subsystems: Vec<String>,
}

impl Changed {
    pub fn from_attributes(attrs: &Attributes) -> Self {
        let subsystems = attrs.get_all("changed")
            .map(|v| v.to_string())
            .collect();

        Changed { subsystems }
    }

    pub fn subsystems(&self) -> impl Iterator<Item = Subsystem> + '_ {
        self.subsystems.iter()
            .filter_map(|subsystem| {
                match subsystem.parse() {
                    Ok(subsystem) => Some(subsystem),
                    Err(()) => {
                        log::warn!("unknown subsystem: {subsystem}");
                        None
                    }
                }
            })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Subsystem {
    Playlist,
    Player,
    Options,
    Mixer,
}

impl FromStr for Subsystem {
    type Err = ();

    fn from_str(s: &str) -> Result<Subsystem, ()> {
        match s {
            "player" => Ok(Subsystem::Player),
            "playlist" => Ok(Subsystem::Playlist),
            "options" => Ok(Subsystem::Options),
            "mixer" => Ok(Subsystem::Mixer),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, FromStr)]
pub struct Seconds(pub f64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OnOffOneshot {
    #[default]
    Off,
    On,
    Oneshot,
}

impl OnOffOneshot {
    pub fn as_arg(self) -> &'static str {
        match self {
            OnOffOneshot::Off => "0",
            OnOffOneshot::On => "1",
            OnOffOneshot::Oneshot => "oneshot",
        }
    }

    pub fn cycle(self) -> OnOffOneshot {
        match self {
            OnOffOneshot::Off => OnOffOneshot::On,
            OnOffOneshot::On => OnOffOneshot::Oneshot,
            OnOffOneshot::Oneshot => OnOffOneshot::Off,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PlaybackOptions {
    pub repeat: bool,
    pub random: bool,
    pub single: OnOffOneshot,
    pub consume: OnOffOneshot,
}

#[derive(Debug, Clone)]
pub struct Status {
    pub state: PlayerState,
    pub song_id: Option<Id>,
    pub elapsed: Option<Seconds>,
    pub duration: Option<Seconds>,
    pub volume: Option<u8>,
    pub crossfade: u32,
    pub options: PlaybackOptions,
    pub playlist_version: u32,
    pub playlist_length: u32,
}

impl Status {
    pub fn from_attributes(attrs: &Attributes) -> Result<Self> {
        let state = match attrs.get_one("state") {
            Some("play") => PlayerState::Play,
            Some("pause") => PlayerState::Pause,
            Some("stop") => PlayerState::Stop,
            Some(state) => bail!("unknown player state: {state}"),
            None => bail!("missing player state"),
        };

        // a host without a mixer reports volume -1
        let volume: Option<i64> = attrs.get_opt("volume")?;

        Ok(Status {
            state,
            song_id: attrs.get_opt("songid")?,
            elapsed: attrs.get_opt("elapsed")?,
            duration: attrs.get_opt("duration")?,
            volume: volume.and_then(|v| u8::try_from(v).ok()),
            crossfade: attrs.get_opt("xfade")?.unwrap_or(0),
            options: PlaybackOptions {
                repeat: attrs.get_bool("repeat")?,
                random: attrs.get_bool("random")?,
                single: option_state(attrs, "single")?,
                consume: option_state(attrs, "consume")?,
            },
            playlist_version: attrs.get("playlist")?,
            playlist_length: attrs.get("playlistlength")?,
        })
    }
}

fn option_state(attrs: &Attributes, name: &str) -> Result<OnOffOneshot> {
    match attrs.get_one(name) {
        None | Some("0") => Ok(OnOffOneshot::Off),
        Some("1") => Ok(OnOffOneshot::On),
        Some("oneshot") => Ok(OnOffOneshot::Oneshot),
        Some(value) => bail!("unknown {name} value: {value:?}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub file: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Seconds>,
}

impl Song {
    /// Returns None for an empty record, which is how the server reports
    /// that nothing is playing.
    pub fn from_attributes(attrs: &Attributes) -> Result<Option<Self>> {
        let Some(file) = attrs.get_one("file") else {
            return Ok(None);
        };

        Ok(Some(Song {
            file: file.to_string(),
            title: attrs.get_one("Title").map(str::to_string),
            artist: attrs.get_one("Artist").map(str::to_string),
            album: attrs.get_one("Album").map(str::to_string),
            duration: attrs.get_opt("duration")?,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub song: Song,
    pub pos: u32,
    pub id: Id,
}

impl QueueItem {
    pub fn from_attributes(attrs: &Attributes) -> Result<Self> {
        let song = Song::from_attributes(attrs)?
            .ok_or_else(|| anyhow!("queue item without file attribute"))?;

        Ok(QueueItem {
            song,
            pos: attrs.get("Pos")?,
            id: attrs.get("Id")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
}

impl Output {
    pub fn from_attributes(attrs: &Attributes) -> Result<Self> {
        Ok(Output {
            id: attrs.get("outputid")?,
            name: attrs.get("outputname")?,
            enabled: attrs.get_bool("outputenabled")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub artists: u64,
    pub albums: u64,
    pub songs: u64,
    pub uptime: u64,
    pub playtime: u64,
    pub db_playtime: u64,
    pub db_update: u64,
}

impl Stats {
    pub fn from_attributes(attrs: &Attributes) -> Result<Self> {
        Ok(Stats {
            artists: attrs.get("artists")?,
            albums: attrs.get("albums")?,
            songs: attrs.get("songs")?,
            uptime: attrs.get("uptime")?,
            playtime: attrs.get("playtime")?,
            db_playtime: attrs.get("db_playtime")?,
            db_update: attrs.get("db_update")?,
        })
    }
}
