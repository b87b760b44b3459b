//! Owned handle around the external decoder process.
//!
//! The decoder writes raw interleaved s16le PCM to stdout and diagnostics to
//! stderr. stdout is read by exactly one thread (the audio thread); stderr is
//! drained continuously by a helper thread so the decoder never blocks on a
//! full pipe. Termination only touches the `Child`, never the stdout lock, so
//! it can interrupt a read that is blocked inside another thread.
//!
//! On Unix the decoder leads its own process group and signals go to the
//! whole group, so wrapper scripts cannot leave children holding stdout.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::StreamError;
use crate::settings::DecoderCommand;

/// Lines of stderr kept for error reports.
const DIAGNOSTIC_LINES: usize = 32;
const EXIT_POLL: Duration = Duration::from_millis(10);
const DRAIN_WAIT: Duration = Duration::from_millis(200);

type Diagnostics = Arc<Mutex<VecDeque<String>>>;

pub struct DecodeProcess {
    program: String,
    pid: u32,
    child: Mutex<Child>,
    stdout: Mutex<ChildStdout>,
    diagnostics: Diagnostics,
    stderr_drain: Mutex<Option<JoinHandle<()>>>,
    terminate_requested: AtomicBool,
    terminate_timeout: Duration,
}

impl DecodeProcess {
    /// Start the decoder for `url`. Fails synchronously if the process cannot be spawned.
    pub fn spawn(
        command: &DecoderCommand,
        url: &str,
        terminate_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let launch_error = |source: std::io::Error| StreamError::Launch {
            program: command.program.clone(),
            source,
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(command.resolved_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(launch_error)?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(launch_error(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "decoder stdout was not captured",
            )));
        };

        let diagnostics: Diagnostics = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_drain = child
            .stderr
            .take()
            .and_then(|stderr| spawn_stderr_drain(stderr, diagnostics.clone()));

        let pid = child.id();
        log::info!("decoder `{}` started (pid {pid}) for {url}", command.program);

        Ok(Self {
            program: command.program.clone(),
            pid,
            child: Mutex::new(child),
            stdout: Mutex::new(stdout),
            diagnostics,
            stderr_drain: Mutex::new(stderr_drain),
            terminate_requested: AtomicBool::new(false),
            terminate_timeout,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.lock_child().try_wait(), Ok(None))
    }

    /// Read up to `buf.len()` bytes of PCM, blocking until the buffer is full
    /// or the stream ends.
    ///
    /// Returns `Ok(0)` on a graceful end: a successful exit, or an exit caused
    /// by [`terminate`](Self::terminate). An abnormal exit is reported as
    /// [`StreamError::StreamEnded`] carrying the decoder's stderr tail.
    pub fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut stdout = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);
        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) if self.terminate_requested.load(Ordering::Acquire) => return Ok(0),
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        drop(stdout);

        if filled > 0 {
            return Ok(filled);
        }
        self.finish()
    }

    /// Ask the decoder to exit, force-kill it after the timeout, and reap it.
    ///
    /// Safe to call any number of times, including after the process exited.
    pub fn terminate(&self) {
        let first = !self.terminate_requested.swap(true, Ordering::AcqRel);
        {
            let mut child = self.lock_child();
            match child.try_wait() {
                Ok(Some(_)) => {
                    // leader is gone; sweep anything it left behind once
                    if first {
                        kill_group(self.pid);
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => log::warn!("decoder pid {}: status check failed: {e}", self.pid),
            }
            request_exit(&mut child);
        }

        if self.wait_for_exit(self.terminate_timeout).is_none() {
            log::warn!(
                "decoder pid {} ignored termination for {:?}; killing",
                self.pid,
                self.terminate_timeout
            );
            let mut child = self.lock_child();
            kill_group(self.pid);
            if let Err(e) = child.kill() {
                log::debug!("decoder pid {}: kill failed: {e}", self.pid);
            }
            let _ = child.wait();
        } else {
            kill_group(self.pid);
        }
        log::debug!("decoder `{}` (pid {}) terminated", self.program, self.pid);
    }

    /// Most recent stderr lines, oldest first.
    pub fn diagnostics(&self) -> String {
        let lines = self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// stdout reached EOF: decide between a graceful end and an abnormal exit.
    fn finish(&self) -> Result<usize, StreamError> {
        let status = self.wait_for_exit(self.terminate_timeout);
        if self.terminate_requested.load(Ordering::Acquire) {
            return Ok(0);
        }
        match status {
            Some(status) if status.success() => {
                log::info!("decoder pid {} finished", self.pid);
                Ok(0)
            }
            Some(status) => {
                self.settle_stderr();
                Err(StreamError::StreamEnded {
                    status: status.to_string(),
                    diagnostics: self.diagnostics(),
                })
            }
            None => {
                self.terminate();
                Err(StreamError::StreamEnded {
                    status: "closed its output without exiting".into(),
                    diagnostics: self.diagnostics(),
                })
            }
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.lock_child().try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("decoder pid {}: wait failed: {e}", self.pid);
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL);
        }
    }

    /// Give the stderr drain a moment to collect the last lines after exit.
    fn settle_stderr(&self) {
        let mut slot = self
            .stderr_drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + DRAIN_WAIT;
        while slot.as_ref().is_some_and(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(EXIT_POLL);
        }
        if slot.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DecodeProcess {
    fn drop(&mut self) {
        self.terminate();
        self.settle_stderr();
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    // SIGTERM lets the decoder flush and exit on its own terms.
    let rc = unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGTERM) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

/// SIGKILL every process still in the decoder's group.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

fn spawn_stderr_drain(stderr: ChildStderr, diagnostics: Diagnostics) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("decoder-stderr".into())
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).trim_end().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        log::debug!("[decoder] {text}");
                        let mut lines = diagnostics.lock().unwrap_or_else(PoisonError::into_inner);
                        if lines.len() >= DIAGNOSTIC_LINES {
                            lines.pop_front();
                        }
                        lines.push_back(text);
                    }
                }
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("could not start decoder stderr reader: {e}");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn sh(script: &str) -> DecoderCommand {
        DecoderCommand::new("sh").args(["-c", script])
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let cmd = DecoderCommand::new("/nonexistent/radio-decoder");
        let err = DecodeProcess::spawn(&cmd, "http://x/stream", TIMEOUT).err().unwrap();
        assert!(matches!(err, StreamError::Launch { .. }));
    }

    #[test]
    fn url_is_passed_through_placeholder() {
        let cmd = DecoderCommand::new("printf").args(["%s", "{url}"]);
        let proc = DecodeProcess::spawn(&cmd, "abcd", TIMEOUT).unwrap();
        let mut buf = [0u8; 16];
        let n = proc.read_chunk(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(proc.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn graceful_exit_is_end_of_stream() {
        let proc = DecodeProcess::spawn(&sh("head -c 10000 /dev/zero"), "u", TIMEOUT).unwrap();
        let mut buf = vec![0u8; 4096];
        let mut total = 0;
        loop {
            let n = proc.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 10000);
        assert!(!proc.is_alive());
    }

    #[test]
    fn abnormal_exit_carries_diagnostics() {
        let proc = DecodeProcess::spawn(
            &sh("head -c 100 /dev/zero; echo 'Server returned 404' >&2; exit 3"),
            "u",
            TIMEOUT,
        )
        .unwrap();
        let mut buf = vec![0u8; 4096];
        assert_eq!(proc.read_chunk(&mut buf).unwrap(), 100);
        match proc.read_chunk(&mut buf) {
            Err(StreamError::StreamEnded { diagnostics, .. }) => {
                assert!(diagnostics.contains("404"), "diagnostics: {diagnostics}")
            }
            other => panic!("expected StreamEnded, got {other:?}"),
        }
    }

    #[test]
    fn terminate_is_idempotent_and_unblocks_reader() {
        let proc = Arc::new(DecodeProcess::spawn(&sh("exec sleep 30"), "u", TIMEOUT).unwrap());
        assert!(proc.is_alive());
        let reader = {
            let proc = proc.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                proc.read_chunk(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(50));
        proc.terminate();
        proc.terminate();
        assert!(!proc.is_alive());
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn decoder_leads_its_own_process_group() {
        let proc = DecodeProcess::spawn(&sh("exec sleep 30"), "u", TIMEOUT).unwrap();
        let pgid = unsafe { libc::getpgid(proc.pid() as libc::pid_t) };
        assert_eq!(pgid, proc.pid() as libc::pid_t);
        proc.terminate();
    }

    #[test]
    fn terminate_reaches_pipeline_children() {
        let proc = Arc::new(DecodeProcess::spawn(&sh("sleep 30 | cat"), "u", TIMEOUT).unwrap());
        let reader = {
            let proc = proc.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                proc.read_chunk(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        proc.terminate();
        // `cat` holds stdout; the read only returns once it is gone too
        assert_eq!(reader.join().unwrap().unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
