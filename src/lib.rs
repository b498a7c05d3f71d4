pub mod art;
pub mod daemon;
pub mod logging;
pub mod mpd;

mod util;
