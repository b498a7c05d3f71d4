use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use mpdnow::{art, daemon, logging, mpd};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = config();
    daemon::run(config).await
}

fn config() -> daemon::Config {
    daemon::Config {
        mpd: mpd(),
        art: art(),
        poll_interval: Duration::from_secs(opt_env("POLL_INTERVAL_SECS").unwrap_or(10)),
    }
}

fn mpd() -> mpd::Config {
    let defaults = mpd::Config::default();

    mpd::Config {
        host: opt_env("MPD_HOST").unwrap_or(defaults.host),
        port: opt_env("MPD_PORT").unwrap_or(defaults.port),
        auto_reconnect: opt_env("AUTO_RECONNECT").unwrap_or(defaults.auto_reconnect),
        reconnect_max_attempts: opt_env("RECONNECT_MAX_ATTEMPTS")
            .unwrap_or(defaults.reconnect_max_attempts),
        reconnect_base_delay: opt_env("RECONNECT_BASE_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.reconnect_base_delay),
    }
}

fn art() -> art::Config {
    let defaults = art::Config::default();

    art::Config {
        music_dir: opt_env("MUSIC_DIR").or(defaults.music_dir),
        cache_dir: opt_env("ART_CACHE_DIR").unwrap_or(defaults.cache_dir),
        extract_tool: opt_env("ART_EXTRACT_TOOL").unwrap_or(defaults.extract_tool),
        api_url: opt_env("ART_API_URL"),
    }
}

fn opt_env<T: FromStr<Err: Display>>(name: &str) -> Option<T> {
    let value = match std::env::var(name) {
        Ok(value) => value,
        Err(VarError::NotPresent) => { return None }
        Err(VarError::NotUnicode(_)) => panic!("env var is invalid utf-8: {name}"),
    };

    match value.parse() {
        Ok(value) => Some(value),
        Err(err) => panic!("invalid format for env var: {name}: {err}"),
    }
}
