use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::mpd::protocol::{Error, MpdReader, MpdWriter, Response};
use crate::mpd::state::StateCache;
use crate::mpd::types::{Changed, Song, Status, Subsystem};

const IDLE_SUBSYSTEMS: &[&str] = &["player", "mixer", "playlist", "options"];

pub(super) enum Op {
    Command(Request),
    Refresh(Refresh),
    Connect,
    Disconnect,
}

pub(super) struct Request {
    pub cmd: String,
    pub args: Vec<String>,
    pub reply: oneshot::Sender<Result<Response, Error>>,
}

#[derive(Debug, Copy, Clone)]
pub(super) enum Refresh {
    Status,
    Song,
}

pub(super) enum Teardown {
    Manual,
    Shutdown,
    Lost(Error),
}

enum Pending {
    Request(Request),
    Refresh(Refresh),
    Idle,
}

/// Drives one open connection until it ends. Commands, refreshes and the
/// idle long-poll all flow through a single queue, and only the entry at
/// the head of the queue is ever on the wire.
pub(super) async fn serve(
    reader: MpdReader,
    writer: MpdWriter,
    ops: &mut mpsc::UnboundedReceiver<Op>,
    cache: &StateCache,
) -> Teardown {
    let (resp_tx, mut responses) = mpsc::unbounded_channel();
    let _reader_task = ReaderTask(tokio::task::spawn(read_responses(reader, resp_tx)));

    let mut conn = Conn {
        writer,
        cache: cache.clone(),
        queue: VecDeque::new(),
        head_written: false,
        idling: false,
        noidle_sent: false,
    };

    conn.queue.push_back(Pending::Refresh(Refresh::Status));
    conn.queue.push_back(Pending::Refresh(Refresh::Song));
    conn.pump().await;

    loop {
        tokio::select! {
            // ops drain ahead of responses so a command sent from a
            // completion handler takes its queue slot before the next
            // reply is applied
            biased;

            op = ops.recv() => match op {
                Some(Op::Command(request)) => conn.enqueue(Pending::Request(request)).await,
                Some(Op::Refresh(kind)) => conn.enqueue(Pending::Refresh(kind)).await,
                Some(Op::Connect) => {}
                Some(Op::Disconnect) => return conn.teardown(Teardown::Manual),
                None => return conn.teardown(Teardown::Shutdown),
            },
            response = responses.recv() => match response {
                Some(Ok(response)) => {
                    conn.complete(response);
                    conn.ensure_idle();
                    conn.pump().await;
                }
                Some(Err(err)) => return conn.teardown(Teardown::Lost(err)),
                None => return conn.teardown(Teardown::Lost(Error::ConnectionLost)),
            },
        }
    }
}

struct Conn {
    writer: MpdWriter,
    cache: StateCache,
    queue: VecDeque<Pending>,
    head_written: bool,
    idling: bool,
    noidle_sent: bool,
}

impl Conn {
    async fn enqueue(&mut self, entry: Pending) {
        self.queue.push_back(entry);

        if self.idling {
            self.interrupt_idle().await;
        } else {
            self.pump().await;
        }
    }

    /// Wakes an outstanding idle so the queue can advance. The server
    /// replies to noidle only while the client is idling; a noidle that
    /// races the idle reply is discarded without a response of its own.
    async fn interrupt_idle(&mut self) {
        if self.noidle_sent {
            return;
        }
        self.noidle_sent = true;

        if let Err(err) = self.writer.send_command("noidle", &[]).await {
            log::warn!("failed to interrupt idle: {err}");
        }
    }

    /// Writes queue entries to the wire, starting with the head, until a
    /// write is outstanding or the queue is empty. A failed write fails
    /// that entry and the queue advances.
    async fn pump(&mut self) {
        while !self.head_written {
            let Some(head) = self.queue.front() else {
                return;
            };

            let result = match head {
                Pending::Request(request) => {
                    let args: Vec<&str> = request.args.iter().map(String::as_str).collect();
                    self.writer.send_command(&request.cmd, &args).await
                }
                Pending::Refresh(Refresh::Status) => {
                    self.writer.send_command("status", &[]).await
                }
                Pending::Refresh(Refresh::Song) => {
                    self.writer.send_command("currentsong", &[]).await
                }
                Pending::Idle => {
                    self.writer.send_command("idle", IDLE_SUBSYSTEMS).await
                }
            };

            match result {
                Ok(()) => {
                    self.head_written = true;

                    if matches!(self.queue.front(), Some(Pending::Idle)) {
                        self.idling = true;
                    }
                }
                Err(err) => {
                    log::warn!("failed to send command to mpd: {err}");

                    if let Some(Pending::Request(request)) = self.queue.pop_front() {
                        let _ = request.reply.send(Err(err));
                    }
                }
            }
        }
    }

    fn complete(&mut self, response: Response) {
        self.head_written = false;

        match self.queue.pop_front() {
            None => log::warn!("mpd sent a response with nothing outstanding"),
            Some(Pending::Request(request)) => {
                let _ = request.reply.send(Ok(response));
            }
            Some(Pending::Refresh(kind)) => self.apply_refresh(kind, response),
            Some(Pending::Idle) => self.complete_idle(response),
        }
    }

    fn complete_idle(&mut self, response: Response) {
        self.idling = false;
        self.noidle_sent = false;

        let changed = match response {
            Ok(ok) => Changed::from_attributes(&ok.attributes),
            Err(ack) => {
                log::warn!("idle failed: {ack}");
                return;
            }
        };

        let mut want_status = false;
        let mut want_song = false;

        for subsystem in changed.subsystems() {
            match subsystem {
                Subsystem::Player | Subsystem::Mixer => {
                    want_status = true;
                    want_song = true;
                }
                Subsystem::Playlist => want_song = true,
                Subsystem::Options => want_status = true,
            }
        }

        if want_status {
            self.queue.push_back(Pending::Refresh(Refresh::Status));
        }
        if want_song {
            self.queue.push_back(Pending::Refresh(Refresh::Song));
        }
    }

    fn apply_refresh(&mut self, kind: Refresh, response: Response) {
        let ok = match response {
            Ok(ok) => ok,
            Err(ack) => {
                log::warn!("refresh failed: {ack}");
                return;
            }
        };

        match kind {
            Refresh::Status => match Status::from_attributes(&ok.attributes) {
                Ok(status) => self.cache.apply_status(&status),
                Err(err) => log::warn!("discarding unparseable status: {err:#}"),
            },
            Refresh::Song => match Song::from_attributes(&ok.attributes) {
                Ok(song) => self.cache.apply_song(song),
                Err(err) => log::warn!("discarding unparseable current song: {err:#}"),
            },
        }
    }

    /// Falls back to the idle long-poll whenever there is nothing queued,
    /// so subsystem changes push through between commands.
    fn ensure_idle(&mut self) {
        if self.queue.is_empty() {
            self.queue.push_back(Pending::Idle);
        }
    }

    fn teardown(mut self, reason: Teardown) -> Teardown {
        for entry in self.queue.drain(..) {
            if let Pending::Request(request) = entry {
                let _ = request.reply.send(Err(Error::ConnectionLost));
            }
        }

        reason
    }
}

async fn read_responses(
    mut reader: MpdReader,
    tx: mpsc::UnboundedSender<Result<Response, Error>>,
) {
    loop {
        match reader.read_response().await {
            Ok(response) => {
                if tx.send(Ok(response)).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        }
    }
}

struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
