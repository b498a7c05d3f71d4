use std::error::Error as StdError;
use std::io;

/// True if the error chain bottoms out in the kind of io error a dropped
/// peer produces.
pub fn connection_dropped(err: &(dyn StdError + 'static)) -> bool {
    matches!(
        io_error(err).map(io::Error::kind),
        Some(io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof)
    )
}

pub fn io_error<'err>(err: &'err (dyn StdError + 'static)) -> Option<&'err io::Error> {
    if let Some(io) = err.downcast_ref::<io::Error>() {
        return Some(io);
    }

    io_error(err.source()?)
}
