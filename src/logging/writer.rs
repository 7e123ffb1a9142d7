//! Append-only log file writer running on its own thread.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Default)]
struct Queue {
    pending: VecDeque<String>,
    recent: VecDeque<String>,
    closing: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
    recent_capacity: usize,
}

/// Queues log lines and writes them to a file in the background.
///
/// Every appended line is eventually written: [`close`](LogWriter::close)
/// waits until the queue is drained and flushed.
pub struct LogWriter {
    shared: Arc<Shared>,
    path: PathBuf,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LogWriter {
    /// Open (or create) `path` for appending and start the writer thread.
    ///
    /// The last `recent_capacity` lines are also kept in memory.
    pub fn open(path: &Path, recent_capacity: usize) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
            recent_capacity,
        });

        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("log-writer".to_string())
                .spawn(move || drain(&shared, BufWriter::new(file)))?
        };

        Ok(Self {
            shared,
            path: path.to_path_buf(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a line. Ignored once the writer is closing.
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        let mut queue = self.shared.queue.lock();
        if queue.closing {
            return;
        }
        if self.shared.recent_capacity > 0 {
            if queue.recent.len() == self.shared.recent_capacity {
                queue.recent.pop_front();
            }
            queue.recent.push_back(line.clone());
        }
        queue.pending.push_back(line);
        self.shared.wake.notify_one();
    }

    /// The most recently appended lines, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.shared.queue.lock().recent.iter().cloned().collect()
    }

    /// Stop accepting lines, wait for the queue to drain, and join the
    /// thread. Idempotent.
    pub fn close(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.closing = true;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Whether the writer thread has finished.
    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_none()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain(shared: &Shared, mut out: BufWriter<File>) {
    loop {
        let (batch, closing) = {
            let mut queue = shared.queue.lock();
            while queue.pending.is_empty() && !queue.closing {
                shared.wake.wait(&mut queue);
            }
            (std::mem::take(&mut queue.pending), queue.closing)
        };

        // Write outside the lock so appenders never wait on disk.
        let written = batch
            .iter()
            .try_for_each(|line| writeln!(out, "{}", line))
            .and_then(|_| out.flush());
        if let Err(e) = written {
            eprintln!("log writer: {}", e);
        }

        if closing {
            let queue = shared.queue.lock();
            if queue.pending.is_empty() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_close_drains_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let writer = LogWriter::open(&path, 10).unwrap();

        for i in 0..500 {
            writer.append(format!("line {}", i));
        }
        writer.close();
        assert!(writer.is_closed());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 500);
        assert_eq!(lines[0], "line 0");
        assert_eq!(lines[499], "line 499");
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let writer = LogWriter::open(&path, 0).unwrap();
        writer.append("later");
        writer.close();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn test_recent_is_bounded() {
        let dir = TempDir::new().unwrap();
        let writer = LogWriter::open(&dir.path().join("app.log"), 3).unwrap();
        for i in 0..5 {
            writer.append(format!("{}", i));
        }
        assert_eq!(writer.recent(), vec!["2", "3", "4"]);
    }

    #[test]
    fn test_append_after_close_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = LogWriter::open(&path, 0).unwrap();
        writer.append("kept");
        writer.close();
        writer.append("dropped");
        writer.close();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }
}
