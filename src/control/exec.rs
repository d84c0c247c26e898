//! Bounded execution of a single control-plane subprocess.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// How long to keep collecting pipe output once the process has exited.
///
/// A daemon started as a side effect of the call may inherit the pipes and keep
/// them open, so collection must not wait for EOF indefinitely.
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Control replies are a handful of lines; anything past this is noise.
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Outcome of one control call.
#[derive(Debug)]
pub struct ControlOutput {
    /// `None` when the call was killed at the deadline.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl ControlOutput {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    /// Short human description of a failed call: stderr if any, else the status.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.status {
            Some(status) => status.to_string(),
            None => "no response".to_string(),
        }
    }
}

/// Run `program args...`, killing it if it outlives `timeout`.
pub fn run_with_timeout(program: &Path, args: &[String], timeout: Duration) -> Result<ControlOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program.display()))?;

    // Drain pipes while waiting so a chatty child can't block on a full pipe
    let stdout_rx = spawn_reader(child.stdout.take());
    let stderr_rx = spawn_reader(child.stderr.take());

    let status = child
        .wait_timeout(timeout)
        .with_context(|| format!("Failed to wait for {}", program.display()))?;

    if status.is_none() {
        kill_child_process(&mut child);
    }

    let stdout = stdout_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_default();
    let stderr = stderr_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_default();

    Ok(ControlOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match stream {
        Some(stream) => {
            thread::spawn(move || {
                let _ = tx.send(read_stream_to_string(stream));
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

fn read_stream_to_string<R: Read>(mut stream: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    // keep draining so the writer never sees EPIPE
                    while stream.read(&mut chunk).unwrap_or(0) > 0 {}
                    break;
                }
            }
            Err(_) => break,
        }
    }

    String::from_utf8_lossy(&buf).to_string()
}

fn kill_child_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
