use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use thiserror::Error;
use tokio::io::{BufReader, AsyncRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub struct MpdReader {
    r: BufReader<Box<dyn AsyncRead + Sync + Send + Unpin>>,
}

pub struct Protocol {
    pub version: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    ProtocolError(#[from] anyhow::Error),
    #[error("not connected to mpd")]
    NotConnected,
    #[error("lost connection to mpd")]
    ConnectionLost,
}

impl MpdReader {
    pub async fn open<R>(r: R) -> anyhow::Result<(Self, Protocol)>
        where R: AsyncRead + Sync + Send + Unpin + 'static
    {
        let mut r = BufReader::new(Box::new(r) as Box<_>);

        let mut line = String::new();
        r.read_line(&mut line).await?;
        let line = line.trim_end();

        let Some(proto) = prefixed("OK MPD ", line) else {
            bail!("unexpected initial line from mpd: {line:?}")
        };

        let reader = MpdReader { r };
        let protocol = Protocol { version: proto.to_string() };

        Ok((reader, protocol))
    }

    pub async fn read_response(&mut self) -> Result<Response, Error> {
        let mut attributes = Attributes::default();

        let mut buff = String::new();
        loop {
            buff.truncate(0);
            self.r.read_line(&mut buff).await?;
            if buff.is_empty() {
                return Err(Error::ConnectionLost);
            }

            let line = buff.trim_end();
            log::trace!("recv: {line}");

            if line == "OK" {
                return Ok(Ok(OkResponse { attributes }));
            }

            if prefixed("ACK ", line).is_some() {
                // the whole line is kept for the caller, error code and all
                let line = line.to_string();
                return Ok(Err(ErrorResponse { line }));
            }

            if let Some((key, value)) = line.split_once(":") {
                let (key, value) = (key.trim(), value.trim());
                attributes.attrs.push((key.to_string(), value.to_string()));
            } else {
                log::debug!("ignoring unrecognised line from mpd: {line:?}");
            }
        }
    }
}

fn prefixed<'a>(prefix: &str, s: &'a str) -> Option<&'a str> {
    if s.starts_with(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

pub type Response = Result<OkResponse, ErrorResponse>;

#[derive(Error, Debug)]
#[error("command returned error: {line}")]
pub struct ErrorResponse {
    pub line: String,
}

#[derive(Debug)]
pub struct OkResponse {
    pub attributes: Attributes,
}

#[derive(Debug, Default)]
pub struct Attributes {
    attrs: Vec<(String, String)>
}

impl Attributes {
    pub fn get<T: FromStr<Err = E>, E: Send + Sync + std::error::Error + 'static>(&self, name: &str) -> anyhow::Result<T> {
        Ok(self.get_one(name)
            .ok_or_else(|| anyhow!("missing {name} attribute"))?
            .parse()
            .with_context(|| format!("malformed {name} attribute"))?)
    }

    pub fn get_opt<T: FromStr<Err = E>, E: Send + Sync + std::error::Error + 'static>(&self, name: &str) -> anyhow::Result<Option<T>> {
        self.get_one(name)
            .map(|value| value.parse().with_context(|| format!("malformed {name} attribute")))
            .transpose()
    }

    pub fn get_bool(&self, name: &str) -> anyhow::Result<bool> {
        match self.get_one(name) {
            None | Some("0") => Ok(false),
            Some("1") => Ok(true),
            Some(value) => Err(anyhow!("malformed {name} attribute: {value:?}")),
        }
    }

    pub fn get_one(&self, name: &str) -> Option<&'_ str> {
        Some(&self.attrs.iter().find(|(k, _)| k == name)?.1)
    }

    pub fn get_all<'a, 'n: 'a>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> {
        self.attrs.iter().filter_map(move |(k, v)| {
            if k == name {
                Some(v.as_str())
            } else {
                None
            }
        })
    }

    pub fn split_at(self, name: &str) -> Vec<Attributes> {
        let mut splits = Vec::new();

        for (k, v) in self.attrs {
            if k == name {
                splits.push(Attributes::default());
            }

            if let Some(split) = splits.last_mut() {
                split.attrs.push((k, v));
            }
        }

        splits
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'_ str, &'_ str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
impl Attributes {
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Attributes {
        Attributes {
            attrs: pairs.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub struct MpdWriter {
    w: Box<dyn AsyncWrite + Send + Sync + Unpin>,
}

impl MpdWriter {
    pub fn open<W>(w: W) -> Self
        where W: AsyncWrite + Send + Sync + Unpin + 'static
    {
        MpdWriter { w: Box::new(w) }
    }

    pub async fn send_command(&mut self, cmd: &str, args: &[&str]) -> Result<(), Error> {
        let mut line = cmd.to_string();
        for arg in args {
            line.push(' ');
            write_arg(&mut line, arg)?;
        }
        line.push('\n');

        self.w.write_all(line.as_bytes()).await?;
        log::trace!("send: {}", line.trim());
        Ok(())
    }
}

fn write_arg(line: &mut String, arg: &str) -> Result<(), Error> {
    if arg.contains('\n') {
        return Err(Error::ProtocolError(anyhow!("newline in command argument")));
    }

    if !needs_quoting(arg) {
        line.push_str(arg);
        return Ok(());
    }

    line.push('"');
    for c in arg.chars() {
        match c {
            '"' | '\\' => {
                line.push('\\');
                line.push(c);
            }
            _ => {
                line.push(c);
            }
        }
    }
    line.push('"');

    Ok(())
}

fn needs_quoting(arg: &str) -> bool {
    arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '\''))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;

    async fn open_reader(input: &str) -> anyhow::Result<(MpdReader, Protocol)> {
        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(input.as_bytes()).await.unwrap();
        drop(server);

        MpdReader::open(client).await
    }

    async fn read_one(input: &str) -> Response {
        let full = format!("OK MPD 0.24.0\n{input}");
        let (mut reader, _) = open_reader(&full).await.unwrap();
        reader.read_response().await.unwrap()
    }

    #[tokio::test]
    async fn consumes_greeting_and_reports_version() {
        let (_, protocol) = open_reader("OK MPD 0.24.0\n").await.unwrap();
        assert_eq!(protocol.version, "0.24.0");
    }

    #[tokio::test]
    async fn rejects_malformed_greeting() {
        assert!(open_reader("hello there\n").await.is_err());
    }

    #[tokio::test]
    async fn parses_attributes_until_ok() {
        let response = read_one("volume: 50\nstate: play\nOK\n").await.unwrap();

        assert_eq!(response.attributes.get_one("volume"), Some("50"));
        assert_eq!(response.attributes.get_one("state"), Some("play"));
        assert_eq!(response.attributes.get_one("missing"), None);
    }

    #[tokio::test]
    async fn keeps_duplicate_keys_in_order() {
        let response = read_one("changed: player\nchanged: mixer\nOK\n").await.unwrap();

        let changed: Vec<&str> = response.attributes.get_all("changed").collect();
        assert_eq!(changed, vec!["player", "mixer"]);
    }

    #[tokio::test]
    async fn returns_ack_line_verbatim() {
        let response = read_one("ACK [50@0] {play} No such song\n").await;

        let err = response.unwrap_err();
        assert_eq!(err.line, "ACK [50@0] {play} No such song");
    }

    #[tokio::test]
    async fn ignores_lines_without_separator() {
        let response = read_one("OK MPD 0.23.5\nsome banner text\nvolume: 30\nOK\n")
            .await
            .unwrap();

        let attrs: Vec<(&str, &str)> = response.attributes.iter().collect();
        assert_eq!(attrs, vec![("volume", "30")]);
    }

    #[tokio::test]
    async fn eof_mid_response_is_connection_lost() {
        let (mut reader, _) = open_reader("OK MPD 0.24.0\nvolume: 3\n").await.unwrap();

        let result = reader.read_response().await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn splits_grouped_records() {
        let response = read_one(concat!(
            "file: a.flac\nTitle: A\n",
            "file: b.flac\nTitle: B\n",
            "OK\n",
        )).await.unwrap();

        let groups = response.attributes.split_at("file");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].get_one("Title"), Some("A"));
        assert_eq!(groups[1].get_one("file"), Some("b.flac"));
    }

    #[tokio::test]
    async fn parses_bool_attributes() {
        let attrs = Attributes::from_pairs(&[("repeat", "1"), ("random", "0"), ("single", "yes")]);

        assert!(attrs.get_bool("repeat").unwrap());
        assert!(!attrs.get_bool("random").unwrap());
        assert!(!attrs.get_bool("missing").unwrap());
        assert!(attrs.get_bool("single").is_err());
    }

    async fn written(cmd: &str, args: &[&str]) -> String {
        let (client, server) = tokio::io::duplex(4096);

        let mut writer = MpdWriter::open(client);
        writer.send_command(cmd, args).await.unwrap();
        drop(writer);

        read_to_end(server).await
    }

    async fn read_to_end(mut io: DuplexStream) -> String {
        let mut out = String::new();
        io.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn writes_bare_commands() {
        assert_eq!(written("play", &[]).await, "play\n");
    }

    #[tokio::test]
    async fn leaves_simple_arguments_unquoted() {
        assert_eq!(written("setvol", &["100"]).await, "setvol 100\n");
    }

    #[tokio::test]
    async fn quotes_arguments_with_spaces() {
        let line = written("search", &["album", "OK Computer"]).await;
        assert_eq!(line, "search album \"OK Computer\"\n");
    }

    #[tokio::test]
    async fn escapes_quotes_and_backslashes() {
        let line = written("add", &[r#"odd"name\file.mp3"#]).await;
        assert_eq!(line, "add \"odd\\\"name\\\\file.mp3\"\n");
    }

    #[tokio::test]
    async fn rejects_newlines_in_arguments() {
        let (client, _server) = tokio::io::duplex(4096);

        let mut writer = MpdWriter::open(client);
        let result = writer.send_command("add", &["bad\nfile"]).await;

        assert!(matches!(result, Err(Error::ProtocolError(_))));
    }
}
