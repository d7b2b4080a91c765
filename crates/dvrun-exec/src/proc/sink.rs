//! Fan-out of a child's output stream.
//!
//! Every chunk read from the child goes to the shared per-device log file and, when echoing is on,
//! to the matching stream of this process. A failing destination is dropped; the child's pipe is
//! still drained so it never blocks on a full buffer.
use std::sync::Arc;

use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    task::JoinHandle,
};
use tracing::warn;

const CHUNK: usize = 8 * 1024;

/// Log file shared by both output streams of one worker.
pub type SharedLog = Arc<Mutex<File>>;

/// Which stream of this process a child's output is echoed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Stdout,
    Stderr,
    Off,
}

impl Echo {
    fn writer(self) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
        match self {
            Echo::Stdout => Some(Box::new(tokio::io::stdout())),
            Echo::Stderr => Some(Box::new(tokio::io::stderr())),
            Echo::Off => None,
        }
    }
}

/// Pump `source` into `log` and the `echo` stream until end of file.
pub fn spawn_tee<R>(mut source: R, log: SharedLog, echo: Echo, rank_id: String) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut log = Some(log);
        let mut echo = echo.writer();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(target: "dvrun.exec.sink", rank = %rank_id, error = %e, "read failed");
                    break;
                }
            };
            let chunk = &buf[..n];

            let mut log_failed = false;
            if let Some(file) = &log {
                if let Err(e) = file.lock().await.write_all(chunk).await {
                    warn!(target: "dvrun.exec.sink", rank = %rank_id, error = %e, "log file write failed");
                    log_failed = true;
                }
            }
            if log_failed {
                log = None;
            }
            if let Some(out) = echo.as_mut() {
                if out.write_all(chunk).await.is_err() {
                    echo = None;
                }
            }
        }

        if let Some(file) = log {
            let _ = file.lock().await.flush().await;
        }
        if let Some(mut out) = echo {
            let _ = out.flush().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempDir;

    #[tokio::test]
    async fn both_streams_land_in_one_file() {
        let tmp = TempDir::new("sink");
        let path = tmp.path().join("out.txt");
        let log: SharedLog = Arc::new(Mutex::new(File::create(&path).await.unwrap()));

        let a = spawn_tee(&b"first\n"[..], log.clone(), Echo::Off, "0".into());
        a.await.unwrap();
        let b = spawn_tee(&b"second\n"[..], log, Echo::Off, "0".into());
        b.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
