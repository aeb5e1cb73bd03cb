// Boundary files & status socket (spec §4.6, §6): the three files the rest
// of the system interacts with — two named FIFOs for data/control input
// and a Unix-domain status socket — plus the 7-line status snapshot
// format. Protocol shape grounded on the reference daemon's accept-loop /
// fixed-framing style: connect, receive one snapshot, server closes.

use std::ffi::CString;
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use crate::engine::ClockStatus;

pub const DATA_PATH: &str = "/dev/psk31.data";
pub const CTRL_PATH: &str = "/dev/psk31.ctrl";
pub const STAT_PATH: &str = "/dev/psk31.stat";

pub const BOUNDARY_PATHS: [&str; 3] = [DATA_PATH, CTRL_PATH, STAT_PATH];

fn mkfifo(path: &str, mode: u32) -> Result<(), String> {
    let c_path = CString::new(path).unwrap();
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            return Err(format!("mkfifo {path}: {err}"));
        }
    }
    Ok(())
}

/// Create the two FIFOs and the status-socket listener (spec §4.6).
/// `/dev/psk31.ctrl` is created for ABI compatibility only — it is never
/// opened or read (spec §9 Open Question resolution).
pub fn create_boundary_files() -> Result<UnixListener, String> {
    let _ = std::fs::remove_file(DATA_PATH);
    let _ = std::fs::remove_file(CTRL_PATH);
    let _ = std::fs::remove_file(STAT_PATH);

    mkfifo(DATA_PATH, 0o622)?;
    mkfifo(CTRL_PATH, 0o622)?;

    let listener = UnixListener::bind(STAT_PATH).map_err(|e| format!("bind {STAT_PATH}: {e}"))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("set_nonblocking {STAT_PATH}: {e}"))?;
    let c_path = CString::new(STAT_PATH).unwrap();
    if unsafe { libc::chmod(c_path.as_ptr(), 0o666) } != 0 {
        return Err(format!(
            "chmod {STAT_PATH}: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(listener)
}

/// Open the data FIFO for non-blocking reads. Re-opened by the caller
/// whenever the writer side closes (spec §4.5's `fd_send == -1` retry).
pub fn open_data_fifo() -> Result<std::fs::File, String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(DATA_PATH)
        .map_err(|e| format!("open {DATA_PATH}: {e}"))
}

/// One accepted status-socket client with its still-unwritten tail of the
/// snapshot buffer.
pub struct StatClient {
    stream: UnixStream,
    buf: Vec<u8>,
    written: usize,
}

impl StatClient {
    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Write as much of the remaining snapshot as the socket will accept
    /// right now. Returns `true` once the whole buffer has gone out (the
    /// caller should then close/drop the client), mirroring the
    /// reference daemon's EPIPE-tolerant send loop.
    fn try_flush(&mut self) -> bool {
        while self.written < self.buf.len() {
            match self.stream.write(&self.buf[self.written..]) {
                Ok(0) => return true,
                Ok(n) => self.written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return true,
                Err(e) => crate::error::fatal(format!("status socket write: {e}")),
            }
        }
        true
    }
}

pub struct StatusServer {
    listener: UnixListener,
    clients: Vec<StatClient>,
}

impl StatusServer {
    pub fn new(listener: UnixListener) -> Self {
        Self {
            listener,
            clients: Vec::new(),
        }
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn client_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.clients.iter().map(|c| c.fd())
    }

    /// Accept every currently-pending connection and hand each one an
    /// immediate snapshot, frozen at accept time (spec §6 — the snapshot
    /// is not live-updated after a client connects).
    pub fn accept_pending(&mut self, snapshot: &str) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        crate::error::fatal(format!("status client nonblocking: {e}"));
                    }
                    self.clients.push(StatClient {
                        stream,
                        buf: snapshot.as_bytes().to_vec(),
                        written: 0,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => crate::error::fatal(format!("status socket accept: {e}")),
            }
        }
    }

    /// Drive every client's pending write forward, dropping any that
    /// finished or disconnected.
    pub fn flush_writes(&mut self) {
        self.clients.retain_mut(|c| !c.try_flush());
    }
}

/// The 7-line status snapshot text (spec §6), formatted exactly as the
/// reference implementation's `asprintf` call.
pub fn format_status(
    amplitude: f64,
    rc_seconds: f64,
    clock: ClockStatus,
    timeout: i32,
    pending_char: usize,
) -> String {
    format!(
        "amplitude {amplitude}\nrc {rc_seconds}\nclock_div {div}\nclock_mash {mash}\nclock_freq {freq}\ntimeout {timeout}\npending_char {pending_char}\n",
        div = clock.div,
        mash = clock.mash,
        freq = clock.freq_mhz(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_snapshot_has_seven_lines_in_fixed_order() {
        let clock = ClockStatus { div: 4096, mash: 1 };
        let text = format_status(1.0, 0.001, clock, 30, 5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("amplitude "));
        assert!(lines[1].starts_with("rc "));
        assert!(lines[2].starts_with("clock_div "));
        assert!(lines[3].starts_with("clock_mash "));
        assert!(lines[4].starts_with("clock_freq "));
        assert!(lines[5].starts_with("timeout "));
        assert!(lines[6].starts_with("pending_char "));
    }

    #[test]
    fn status_snapshot_reports_zero_frequency_when_clock_stopped() {
        let clock = ClockStatus { div: 0, mash: 0 };
        let text = format_status(1.0, 0.001, clock, -1, 0);
        assert!(text.contains("clock_freq 0\n"));
    }
}
