use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn, error, info};
use amp_common::Result;

/// Owns one child process and drains its output.
///
/// Output lines are scanned for readiness markers; the receiver returned by
/// [`ProcessManager::spawn`] yields once a marker is seen and closes without
/// a value if the process ends its output first. Once every output stream
/// has closed the process counts as gone, even before it is reaped.
pub struct ProcessManager {
    child: Option<Child>,
    name: String,
    alive: Arc<AtomicBool>,
}

/// Shared between the drain tasks of one spawn
struct OutputWatch {
    open_streams: AtomicUsize,
    alive: Arc<AtomicBool>,
}

impl ProcessManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            child: None,
            name: name.into(),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn a new process, replacing any previous one
    pub async fn spawn(
        &mut self,
        mut command: Command,
        readiness_markers: &[String],
    ) -> Result<mpsc::Receiver<()>> {
        // Ensure old process is cleaned up first
        self.cleanup().await?;

        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let markers: Arc<[String]> = readiness_markers.into();

        self.alive = Arc::new(AtomicBool::new(true));
        let watch = Arc::new(OutputWatch {
            open_streams: AtomicUsize::new(2),
            alive: self.alive.clone(),
        });

        if let Some(stdout) = child.stdout.take() {
            self.drain(stdout, "stdout", markers.clone(), ready_tx.clone(), watch.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.drain(stderr, "stderr", markers, ready_tx, watch);
        }

        info!("Spawned {} process (pid {:?})", self.name, child.id());
        self.child = Some(child);
        Ok(ready_rx)
    }

    /// Drain one output stream so the child never blocks on a full pipe
    fn drain<R>(
        &self,
        stream: R,
        label: &'static str,
        markers: Arc<[String]>,
        ready_tx: mpsc::Sender<()>,
        watch: Arc<OutputWatch>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{} {}: {}", name, label, line);
                let is_marker = markers.iter().any(|marker| line.contains(marker.as_str()));
                if is_marker {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.try_send(());
                    }
                }
            }

            if watch.open_streams.fetch_sub(1, Ordering::AcqRel) == 1 {
                debug!("{} closed its output", name);
                watch.alive.store(false, Ordering::Release);
            }
        });
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut child) = self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("{} exited with status: {:?}", self.name, status);
                    self.child = None;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Error checking process status: {}", e);
                    false
                }
            }
        } else {
            false
        }
    }

    /// Whether the process still holds its output open. Unlike
    /// [`ProcessManager::is_running`] this needs no mutable access.
    pub fn is_alive(&self) -> bool {
        self.child.is_some() && self.alive.load(Ordering::Acquire)
    }

    /// Gracefully terminate the process, killing it if it lingers
    pub async fn terminate(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        if let Some(mut child) = self.child.take() {
            info!("Terminating {} process", self.name);

            // First try SIGTERM for graceful shutdown
            #[cfg(unix)]
            {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;

                if let Some(pid) = child.id() {
                    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

                    match timeout(Duration::from_secs(5), child.wait()).await {
                        Ok(Ok(status)) => {
                            info!("{} exited gracefully with status: {:?}", self.name, status);
                            return Ok(());
                        }
                        _ => {
                            warn!("{} didn't exit gracefully, forcing kill", self.name);
                        }
                    }
                }
            }

            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", self.name, e);
            }

            match timeout(Duration::from_secs(2), child.wait()).await {
                Ok(Ok(status)) => {
                    info!("{} forcefully killed with status: {:?}", self.name, status);
                }
                Ok(Err(e)) => {
                    error!("Error waiting for {} to exit: {}", self.name, e);
                }
                Err(_) => {
                    error!("Timeout waiting for {} to exit after kill", self.name);
                }
            }
        }

        Ok(())
    }

    /// Clean up any existing process
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.is_running() {
            self.terminate().await?;
        }
        self.child = None;
        Ok(())
    }

    /// Get process ID if running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref()?.id()
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // kill_on_drop covers the no-runtime case
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            let name = self.name.clone();
            runtime.spawn(async move {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {} on drop: {}", name, e);
                }
                let _ = child.wait().await;
            });
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn markers() -> Vec<String> {
        vec!["graph splits".to_string()]
    }

    #[tokio::test]
    async fn test_process_lifecycle() {
        let mut pm = ProcessManager::new("test");

        let _ready = pm.spawn(shell("sleep 10"), &markers()).await.unwrap();
        assert!(pm.is_running());
        assert!(pm.pid().is_some());

        assert!(pm.terminate().await.is_ok());
        assert!(!pm.is_running());
        assert!(pm.pid().is_none());
    }

    #[tokio::test]
    async fn test_readiness_marker_detected() {
        let mut pm = ProcessManager::new("test");

        let mut ready = pm
            .spawn(
                shell("echo loading; echo 'llama_new_context_with_model: graph splits = 2'; sleep 10"),
                &markers(),
            )
            .await
            .unwrap();

        let signal = timeout(Duration::from_secs(5), ready.recv()).await.unwrap();
        assert_eq!(signal, Some(()));

        pm.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_on_stderr_detected() {
        let mut pm = ProcessManager::new("test");

        let mut ready = pm
            .spawn(shell("echo 'graph splits = 1' 1>&2; sleep 10"), &markers())
            .await
            .unwrap();

        let signal = timeout(Duration::from_secs(5), ready.recv()).await.unwrap();
        assert_eq!(signal, Some(()));

        pm.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_readiness_closes_when_process_exits() {
        let mut pm = ProcessManager::new("test");

        let mut ready = pm
            .spawn(shell("echo 'failed to load model'; exit 1"), &markers())
            .await
            .unwrap();

        let signal = timeout(Duration::from_secs(5), ready.recv()).await.unwrap();
        assert_eq!(signal, None);
        // Both streams have closed once the channel does
        assert!(!pm.is_alive());
    }

    #[tokio::test]
    async fn test_is_alive_tracks_killed_process() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let mut pm = ProcessManager::new("test");
        let _ready = pm.spawn(shell("exec sleep 30"), &markers()).await.unwrap();
        assert!(pm.is_alive());

        let pid = pm.pid().unwrap();
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

        timeout(Duration::from_secs(5), async {
            while pm.is_alive() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        pm.cleanup().await.unwrap();
        assert!(pm.pid().is_none());
    }

    #[tokio::test]
    async fn test_terminate_without_process_is_noop() {
        let mut pm = ProcessManager::new("test");
        assert!(pm.terminate().await.is_ok());
        assert!(pm.cleanup().await.is_ok());
    }
}
