use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nix::sys::stat::{stat, SFlag};
use tokio::net::unix::pipe;

/// Candidate runtime directories for the CLI pipe pair, most specific
/// first
fn pipe_locations(pipename: &str) -> Vec<PathBuf> {
    let uid = unsafe { libc::getuid() };
    [
        format!("/run/{}/", pipename),
        format!("/run/{}/", uid),
        "/run/".to_string(),
        format!("/var/run/{}/", pipename),
        format!("/var/run/{}/", uid),
        "/var/run/".to_string(),
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn is_fifo(path: &Path) -> bool {
    match stat(path) {
        Ok(st) => SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFIFO),
        Err(_) => false,
    }
}

fn check_mode(path: &Path) {
    if let Ok(st) = stat(path) {
        if st.st_mode & 0o777 != 0o600 {
            warn!(
                "Named pipe {} is not mode 0600; anyone with access can drive the daemon",
                path.display()
            );
        }
    }
}

/// Locate an existing `<root>/<name>.in` / `<name>.out` FIFO pair
pub fn find_pipes(pipename: &str) -> Option<(PathBuf, PathBuf)> {
    for location in pipe_locations(pipename) {
        let cli_in = location.join(format!("{}.in", pipename));
        let cli_out = location.join(format!("{}.out", pipename));
        if is_fifo(&cli_in) && is_fifo(&cli_out) {
            check_mode(&cli_in);
            check_mode(&cli_out);
            return Some((cli_in, cli_out));
        }
    }
    None
}

/// Open the CLI pipes from the daemon side: we read `.in` and write
/// `.out`. A sender we keep on our own `.in` prevents EOF between CLI
/// invocations. Returns (receiver, out path, keepalive sender).
pub fn open_cli(pipename: &str) -> io::Result<(pipe::Receiver, PathBuf, pipe::Sender)> {
    let (cli_in, cli_out) = find_pipes(pipename).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("No FIFO pair for '{}' found", pipename),
        )
    })?;
    debug!("Using CLI pipes {} / {}", cli_in.display(), cli_out.display());
    let receiver = pipe::OpenOptions::new().open_receiver(&cli_in)?;
    let keepalive = pipe::OpenOptions::new().open_sender(&cli_in)?;
    Ok((receiver, cli_out, keepalive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fifo_rejects_regular_files() {
        assert!(!is_fifo(Path::new("/etc/hostname")));
        assert!(!is_fifo(Path::new("/definitely/not/there")));
    }

    #[test]
    fn test_find_pipes_absent() {
        assert!(find_pipes("sbgpd-test-does-not-exist").is_none());
    }
}
