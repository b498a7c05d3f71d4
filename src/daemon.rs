use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use futures::{future, pin_mut};
use tokio::time::MissedTickBehavior;

use crate::art::ArtStore;
use crate::logging;
use crate::mpd::types::Song;
use crate::mpd::Mpd;

#[derive(Debug, Clone)]
pub struct Config {
    pub mpd: crate::mpd::Config,
    pub art: crate::art::Config,
    pub poll_interval: Duration,
}

/// Runs the daemon until a task fails or the process is interrupted.
pub async fn run(config: Config) -> Result<()> {
    let mpd = Mpd::new(config.mpd);
    let art = ArtStore::new(config.art);

    mpd.connect();

    let connection_task = connection_task(mpd.clone());
    pin_mut!(connection_task);

    let playback_task = playback_task(mpd.clone(), art.clone());
    pin_mut!(playback_task);

    let poll_task = poll_task(mpd.clone(), config.poll_interval);
    pin_mut!(poll_task);

    let shutdown_task = shutdown_task();
    pin_mut!(shutdown_task);

    let result = future::select_all([
        connection_task as Pin<&mut (dyn Future<Output = Result<()>> + Send)>,
        playback_task,
        poll_task,
        shutdown_task,
    ]).await.0;

    if let Err(err) = &result {
        logging::error(err);
    }

    mpd.disconnect();
    result
}

async fn connection_task(mpd: Mpd) -> Result<()> {
    let mut state = mpd.connection();

    loop {
        log::debug!("mpd connection state: {:?}", *state.borrow_and_update());
        state.changed().await?;
    }
}

async fn playback_task(mpd: Mpd, art: ArtStore) -> Result<()> {
    let mut playback = mpd.playback();
    let mut current: Option<Song> = None;

    loop {
        let song = playback.borrow_and_update().song.clone();

        if song != current {
            match &song {
                Some(song) => {
                    log::info!("now playing: {}", describe(song));
                    prefetch_art(&art, song);
                }
                None => log::info!("playback stopped"),
            }

            current = song;
        }

        playback.changed().await?;
    }
}

/// Periodically re-reads status and current song, catching anything the
/// idle stream missed. An interval of zero disables polling.
async fn poll_task(mpd: Mpd, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        log::info!("status polling disabled");
        return future::pending().await;
    }

    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // the first tick fires immediately; the connection does its own
    // initial sync
    timer.tick().await;

    loop {
        timer.tick().await;
        mpd.refresh();
    }
}

async fn shutdown_task() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    Ok(())
}

fn prefetch_art(art: &ArtStore, song: &Song) {
    let art = art.clone();
    let song = song.clone();

    tokio::task::spawn(async move {
        if art.get(&song).await.is_none() {
            log::debug!("no art found for {}", describe(&song));
        }
    });
}

/// Human-readable song label for logs.
fn describe(song: &Song) -> String {
    let title = song.title.as_deref().unwrap_or(&song.file);

    match song.artist.as_deref() {
        Some(artist) => format!("{artist} - {title}"),
        None => title.to_string(),
    }
}
