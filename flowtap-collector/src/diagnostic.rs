//! Kernel trace stream tap.
//!
//! Copies each line of a trace stream (normally the tracefs `trace_pipe`)
//! to the debug log with a `[TRACE]` prefix. Runs on its own thread and
//! shares only the shutdown flag with the driver loop.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::logger::Logger;
use crate::signal::{ShutdownCheck, ShutdownFlag};

/// Handle to a running tap thread.
pub struct DiagnosticTap {
    shutdown: ShutdownFlag,
    done: mpsc::Receiver<usize>,
    handle: Option<JoinHandle<()>>,
}

impl DiagnosticTap {
    /// Open `path` and start tapping it.
    pub fn open<L>(path: &Path, logger: L, shutdown: ShutdownFlag) -> io::Result<Self>
    where
        L: Logger + 'static,
    {
        let file = File::open(path)?;
        Ok(Self::spawn(BufReader::new(file), logger, shutdown))
    }

    /// Start tapping `reader` on a background thread.
    ///
    /// The thread exits at end of stream, on a read error, or once
    /// `shutdown` is set. The flag is checked after each completed read, so
    /// a line already read is always logged.
    pub fn spawn<R, L>(reader: R, logger: L, shutdown: ShutdownFlag) -> Self
    where
        R: BufRead + Send + 'static,
        L: Logger + 'static,
    {
        let (tx, done) = mpsc::channel();
        let flag = shutdown.clone();
        let handle = thread::spawn(move || {
            let lines = pump(reader, &logger, &flag);
            let _ = tx.send(lines);
        });

        Self {
            shutdown,
            done,
            handle: Some(handle),
        }
    }

    /// Signal the thread and wait up to `grace` for it to finish.
    ///
    /// Returns the number of lines tapped, or `None` if the thread is still
    /// blocked in a read after `grace` (it is then left detached).
    pub fn stop(self, grace: Duration) -> Option<usize> {
        self.shutdown.trigger();
        self.wait(grace)
    }

    /// Wait up to `timeout` for the thread to finish on its own (end of
    /// stream, read error or an earlier shutdown) without signalling it.
    pub fn wait(mut self, timeout: Duration) -> Option<usize> {
        let lines = self.done.recv_timeout(timeout).ok()?;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Some(lines)
    }
}

fn pump<R: BufRead, L: Logger>(mut reader: R, logger: &L, shutdown: &ShutdownFlag) -> usize {
    let mut buf = Vec::new();
    let mut tapped = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    logger.debug(&format!("[TRACE] {line}"));
                    tapped += 1;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                logger.warn(&format!("trace stream read failed: {e}"));
                break;
            }
        }
        if shutdown.should_stop() {
            break;
        }
    }
    tapped
}
