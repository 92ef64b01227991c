use std::io;

pub trait IntoIOErr {
    fn into_io_err(self) -> io::Error;
}

impl IntoIOErr for reqwest::Error {
    fn into_io_err(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }
}

/// Parses the `Range` header of a `308 Resume Incomplete` response,
/// e.g. `bytes=0-524287`, into the inclusive byte range the server holds.
pub fn parse_range_header(range: &str) -> anyhow::Result<(u64, u64)> {
    use anyhow::Context;

    let (_, r) = range
        .split_once('=')
        .with_context(|| format!("invalid range header `{}`", range))?;

    let (start, end) = r
        .split_once('-')
        .with_context(|| format!("invalid range `{}`", r))?;

    let start = start.trim().parse::<u64>()?;
    let end = end.trim().parse::<u64>()?;
    Ok((start, end))
}

/// Escapes a value for use inside a single-quoted string of Drive's `q` grammar.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Percentage of `done` over `total`, floored, clamped to 0..=100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}
