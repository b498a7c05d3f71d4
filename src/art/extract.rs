use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::fs;
use tokio::process::Command;

/// Pulls embedded cover art out of a song file by asking an external tool
/// to copy the attached picture stream into a scratch file.
pub async fn embedded_art(tool: &str, song: &Path) -> Option<Vec<u8>> {
    if fs::metadata(song).await.is_err() {
        return None;
    }

    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => {
            log::warn!("creating scratch dir for art extraction: {err}");
            return None;
        }
    };

    let output = scratch.path().join("cover.jpg");

    let status = Command::new(tool)
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg("-i").arg(song)
        .arg("-an")
        .arg("-codec:v").arg("copy")
        .arg(&output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!("art extraction tool {tool} not found");
            return None;
        }
        Err(err) => {
            log::warn!("running {tool}: {err}");
            return None;
        }
    }

    // exit status is unreliable across tools; a missing output file is the
    // real failure signal
    fs::read(&output).await.ok()
}
