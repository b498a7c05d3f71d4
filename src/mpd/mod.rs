pub mod protocol;
pub mod state;
pub mod transport;
pub mod types;

mod conn;

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use derive_more::Display;
use tokio::pin;
use tokio::sync::{mpsc, oneshot, watch};

use crate::util;

use conn::{Op, Refresh, Request, Teardown};
use protocol::{Error, MpdReader, MpdWriter, OkResponse, Protocol, Response};
use state::{Playback, StateCache};
use transport::{TcpTransport, Transport};
use types::{Id, OnOffOneshot, Output, PlayerState, QueueItem, Song, Stats, Status};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub auto_reconnect: bool,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 6600,
            auto_reconnect: true,
            reconnect_max_attempts: 3,
            reconnect_base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// Handle to the player connection. Cheap to clone; all clones talk to
/// the same connection task.
#[derive(Clone)]
pub struct Mpd {
    ops: mpsc::UnboundedSender<Op>,
    shared: Arc<Shared>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    cache: StateCache,
}

impl Mpd {
    pub fn new(config: Config) -> Mpd {
        Mpd::with_transport(config, Box::new(TcpTransport))
    }

    pub fn with_transport(config: Config, transport: Box<dyn Transport>) -> Mpd {
        let (ops, ops_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            state,
            cache: StateCache::new(),
        });

        tokio::task::spawn(supervise(config, transport, ops_rx, shared.clone()));

        Mpd { ops, shared }
    }

    /// Asks the connection task to dial the server. A no-op while already
    /// connected; resets the retry budget when reconnection has given up.
    pub fn connect(&self) {
        let _ = self.ops.send(Op::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.ops.send(Op::Disconnect);
    }

    /// Queues a status and current-song re-read behind whatever is already
    /// in flight. Fire-and-forget; dropped while disconnected.
    pub fn refresh(&self) {
        let _ = self.ops.send(Op::Refresh(Refresh::Status));
        let _ = self.ops.send(Op::Refresh(Refresh::Song));
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn playback(&self) -> watch::Receiver<Playback> {
        self.shared.cache.subscribe()
    }

    pub fn playback_snapshot(&self) -> Playback {
        self.shared.cache.snapshot()
    }

    pub async fn play(&self) -> Result<()> {
        self.command("play", &[]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn playid(&self, id: &Id) -> Result<()> {
        self.command("playid", &[id.as_str()]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.command("pause", &["1"]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.command("stop", &[]).await?;
        self.refresh();
        Ok(())
    }

    /// Plays or pauses depending on the cached player state.
    pub async fn toggle(&self) -> Result<()> {
        match self.shared.cache.snapshot().state {
            PlayerState::Play => self.command("pause", &["1"]).await?,
            PlayerState::Pause => self.command("pause", &["0"]).await?,
            PlayerState::Stop => self.command("play", &[]).await?,
        };

        self.refresh();
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.command("next", &[]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        self.command("previous", &[]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn seekcur(&self, pos: f64) -> Result<()> {
        let pos = format!("{pos}");
        self.command("seekcur", &[&pos]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn setvol(&self, volume: i64) -> Result<()> {
        let volume = volume.clamp(0, 100).to_string();
        self.command("setvol", &[&volume]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn crossfade(&self, seconds: i64) -> Result<()> {
        let seconds = seconds.clamp(0, 120).to_string();
        self.command("crossfade", &[&seconds]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn random(&self, on: bool) -> Result<()> {
        self.command("random", &[boolean(on)]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn toggle_random(&self) -> Result<()> {
        let on = self.shared.cache.snapshot().options.random;
        self.random(!on).await
    }

    pub async fn repeat(&self, on: bool) -> Result<()> {
        self.command("repeat", &[boolean(on)]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn toggle_repeat(&self) -> Result<()> {
        let on = self.shared.cache.snapshot().options.repeat;
        self.repeat(!on).await
    }

    pub async fn single(&self, mode: OnOffOneshot) -> Result<()> {
        self.command("single", &[mode.as_arg()]).await?;
        self.refresh();
        Ok(())
    }

    /// Steps single mode through off, on, oneshot and around again.
    pub async fn toggle_single(&self) -> Result<()> {
        let mode = self.shared.cache.snapshot().options.single;
        self.single(mode.cycle()).await
    }

    pub async fn consume(&self, mode: OnOffOneshot) -> Result<()> {
        self.command("consume", &[mode.as_arg()]).await?;
        self.refresh();
        Ok(())
    }

    /// Turns consume on from off, and off from anything else. Oneshot can
    /// be set explicitly but is never entered from the toggle.
    pub async fn toggle_consume(&self) -> Result<()> {
        let mode = match self.shared.cache.snapshot().options.consume {
            OnOffOneshot::Off => OnOffOneshot::On,
            OnOffOneshot::On | OnOffOneshot::Oneshot => OnOffOneshot::Off,
        };

        self.consume(mode).await
    }

    pub async fn shuffle(&self) -> Result<()> {
        self.command("shuffle", &[]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.command("clear", &[]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn add(&self, location: &str) -> Result<()> {
        self.command("add", &[location]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn addid(&self, location: &str, pos: Option<u32>) -> Result<Id> {
        let pos = pos.map(|pos| pos.to_string());

        let mut args = vec![location];
        if let Some(pos) = &pos {
            args.push(pos);
        }

        let resp = self.command("addid", &args).await?;
        self.refresh();

        resp.attributes.get("Id")
    }

    pub async fn delete(&self, pos: u32) -> Result<()> {
        let pos = pos.to_string();
        self.command("delete", &[&pos]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn deleteid(&self, id: &Id) -> Result<()> {
        self.command("deleteid", &[id.as_str()]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn move_song(&self, from: u32, to: u32) -> Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        self.command("move", &[&from, &to]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn moveid(&self, id: &Id, to: u32) -> Result<()> {
        let to = to.to_string();
        self.command("moveid", &[id.as_str(), &to]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn swap(&self, a: u32, b: u32) -> Result<()> {
        let a = a.to_string();
        let b = b.to_string();
        self.command("swap", &[&a, &b]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn swapid(&self, a: &Id, b: &Id) -> Result<()> {
        self.command("swapid", &[a.as_str(), b.as_str()]).await?;
        self.refresh();
        Ok(())
    }

    /// Starts a database update, returning the job id. With a path, only
    /// that subtree is updated.
    pub async fn update(&self, path: Option<&str>) -> Result<u32> {
        let args: Vec<&str> = path.into_iter().collect();
        let resp = self.command("update", &args).await?;
        self.refresh();

        resp.attributes.get("updating_db")
    }

    pub async fn rescan(&self, path: Option<&str>) -> Result<u32> {
        let args: Vec<&str> = path.into_iter().collect();
        let resp = self.command("rescan", &args).await?;
        self.refresh();

        resp.attributes.get("updating_db")
    }

    pub async fn outputs(&self) -> Result<Vec<Output>> {
        let resp = self.command("outputs", &[]).await?;
        self.refresh();

        resp.attributes.split_at("outputid")
            .into_iter()
            .map(|attrs| Output::from_attributes(&attrs))
            .collect::<Result<Vec<_>>>()
            .context("parsing outputs response")
    }

    pub async fn enableoutput(&self, id: u32) -> Result<()> {
        let id = id.to_string();
        self.command("enableoutput", &[&id]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn disableoutput(&self, id: u32) -> Result<()> {
        let id = id.to_string();
        self.command("disableoutput", &[&id]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn toggleoutput(&self, id: u32) -> Result<()> {
        let id = id.to_string();
        self.command("toggleoutput", &[&id]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<()> {
        self.command("load", &[name]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn save(&self, name: &str) -> Result<()> {
        self.command("save", &[name]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn rm(&self, name: &str) -> Result<()> {
        self.command("rm", &[name]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn playlistadd(&self, name: &str, location: &str) -> Result<()> {
        self.command("playlistadd", &[name, location]).await?;
        self.refresh();
        Ok(())
    }

    pub async fn listplaylists(&self) -> Result<Vec<String>> {
        let resp = self.command("listplaylists", &[]).await?;
        self.refresh();

        Ok(resp.attributes.get_all("playlist").map(str::to_string).collect())
    }

    pub async fn playlistinfo(&self) -> Result<Vec<QueueItem>> {
        let resp = self.command("playlistinfo", &[]).await?;
        self.refresh();

        resp.attributes.split_at("file")
            .into_iter()
            .map(|attrs| QueueItem::from_attributes(&attrs))
            .collect::<Result<Vec<_>>>()
            .context("parsing playlist info response")
    }

    pub async fn search(&self, field: &str, query: &str) -> Result<Vec<Song>> {
        let resp = self.command("search", &[field, query]).await?;
        self.refresh();

        resp.attributes.split_at("file")
            .into_iter()
            .map(|attrs| {
                Song::from_attributes(&attrs)?
                    .context("song record without file attribute")
            })
            .collect::<Result<Vec<_>>>()
            .context("parsing search response")
    }

    pub async fn stats(&self) -> Result<Stats> {
        let resp = self.command("stats", &[]).await?;
        self.refresh();

        Stats::from_attributes(&resp.attributes)
    }

    pub async fn status(&self) -> Result<Status> {
        let resp = self.command("status", &[]).await?;
        Status::from_attributes(&resp.attributes)
    }

    pub async fn currentsong(&self) -> Result<Option<Song>> {
        let resp = self.command("currentsong", &[]).await?;
        Song::from_attributes(&resp.attributes)
    }

    async fn command(&self, cmd: &str, args: &[&str]) -> Result<OkResponse> {
        let result = self.try_command(cmd, args).await;

        ok_response(result).with_context(|| Command {
            command: cmd.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    async fn try_command(&self, cmd: &str, args: &[&str]) -> Result<Response, Error> {
        if *self.shared.state.borrow() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let (reply, rx) = oneshot::channel();

        let request = Request {
            cmd: cmd.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            reply,
        };

        if self.ops.send(Op::Command(request)).is_err() {
            return Err(Error::ConnectionLost);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionLost),
        }
    }
}

fn boolean(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

fn ok_response(result: Result<Response, Error>) -> Result<OkResponse> {
    Ok(result??)
}

#[derive(Debug, Display)]
#[display("mpd command failed: {command} (args: {args:?})")]
struct Command {
    command: String,
    args: Vec<String>,
}

/// Owns the connection lifecycle. Runs until every client handle has been
/// dropped, dialing on request and redialing with a bounded backoff after
/// a failure.
async fn supervise(
    config: Config,
    transport: Box<dyn Transport>,
    mut ops: mpsc::UnboundedReceiver<Op>,
    shared: Arc<Shared>,
) {
    'wait: loop {
        match ops.recv().await {
            None => return,
            Some(Op::Connect) => {}
            Some(Op::Command(request)) => {
                let _ = request.reply.send(Err(Error::NotConnected));
                continue 'wait;
            }
            Some(Op::Disconnect) => {
                shared.state.send_replace(ConnectionState::Disconnected);
                continue 'wait;
            }
            Some(Op::Refresh(_)) => continue 'wait,
        }

        let mut attempt: u32 = 0;

        'run: loop {
            shared.state.send_replace(ConnectionState::Connecting);

            let error = match open_connection(&config, transport.as_ref()).await {
                Ok((reader, writer, protocol)) => {
                    log::info!("Connected to mpd at {}:{}, protocol version {}",
                        config.host, config.port, protocol.version);

                    attempt = 0;
                    shared.state.send_replace(ConnectionState::Connected);

                    match conn::serve(reader, writer, &mut ops, &shared.cache).await {
                        Teardown::Manual => {
                            shared.state.send_replace(ConnectionState::Disconnected);
                            continue 'wait;
                        }
                        Teardown::Shutdown => return,
                        Teardown::Lost(err) => err,
                    }
                }
                Err(err) => err,
            };

            match &error {
                Error::ConnectionLost => log::info!("mpd closed the connection"),
                err if util::connection_dropped(err) => log::info!("mpd connection dropped: {err}"),
                err => log::warn!("mpd connection failed: {err}"),
            }

            shared.state.send_replace(ConnectionState::Failed(error.to_string()));

            attempt += 1;
            if !config.auto_reconnect || attempt >= config.reconnect_max_attempts {
                log::warn!("giving up on mpd after {attempt} failed attempts");
                continue 'wait;
            }

            let delay = config.reconnect_base_delay * cmp::min(attempt, config.reconnect_max_attempts);
            log::info!("reconnecting to mpd in {delay:?}");

            let sleep = tokio::time::sleep(delay);
            pin!(sleep);

            loop {
                tokio::select! {
                    () = &mut sleep => continue 'run,
                    op = ops.recv() => match op {
                        None => return,
                        Some(Op::Connect) => {
                            attempt = 0;
                            continue 'run;
                        }
                        Some(Op::Disconnect) => {
                            shared.state.send_replace(ConnectionState::Disconnected);
                            continue 'wait;
                        }
                        Some(Op::Command(request)) => {
                            let _ = request.reply.send(Err(Error::NotConnected));
                        }
                        Some(Op::Refresh(_)) => {}
                    },
                }
            }
        }
    }
}

async fn open_connection(
    config: &Config,
    transport: &dyn Transport,
) -> Result<(MpdReader, MpdWriter, Protocol), Error> {
    let stream = transport.connect(&config.host, config.port).await?;

    let (reader, protocol) = MpdReader::open(stream.read).await?;
    let writer = MpdWriter::open(stream.write);

    Ok((reader, writer, protocol))
}
