//! Scoped handle around one 7-Zip invocation.
//!
//! Stdin is closed from the start (nothing is ever sent). Stderr is drained
//! on a helper thread so a chatty tool cannot block on a full pipe while we
//! read stdout. Dropping the handle kills and reaps a child that is still
//! running, whichever way the caller left.

use crate::types::errors::{ExtractError, ExtractResult};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Fully captured output of a finished invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

pub struct ToolProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    /// Set once the child has been waited for.
    exit: Option<(ExitStatus, String)>,
}

impl ToolProcess {
    pub fn spawn(exe: &Path, args: &[OsString]) -> ExtractResult<Self> {
        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ExtractError::Unsupported(format!(
                "7-Zip executable not found: {}",
                exe.display()
            )),
            _ => ExtractError::Io(e),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        log::debug!("Spawned {} (pid {})", exe.display(), child.id());
        Ok(Self {
            child,
            stdout,
            stderr,
            exit: None,
        })
    }

    /// Spawn, capture everything, wait.
    pub fn run_to_end(exe: &Path, args: &[OsString]) -> ExtractResult<ToolOutput> {
        let mut process = Self::spawn(exe, args)?;
        let mut stdout = Vec::new();
        if let Some(pipe) = process.stdout.as_mut() {
            pipe.read_to_end(&mut stdout)?;
        }
        let (status, stderr) = process.finish()?;

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
        })
    }

    /// Drain what is left of stdout, wait for exit, collect stderr.
    pub fn finish(&mut self) -> io::Result<(ExitStatus, String)> {
        if let Some(done) = &self.exit {
            return Ok(done.clone());
        }
        if let Some(mut pipe) = self.stdout.take() {
            io::copy(&mut pipe, &mut io::sink())?;
        }
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        self.exit = Some((status, stderr.clone()));
        Ok((status, stderr))
    }
}

/// Reading the process reads its stdout. At end of stream the exit status
/// is checked, and a failed run surfaces as an error carrying stderr rather
/// than as a clean EOF.
impl Read for ToolProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.stdout.as_mut() {
            Some(pipe) => pipe.read(buf)?,
            None => 0,
        };
        if n > 0 || buf.is_empty() {
            return Ok(n);
        }

        let (status, stderr) = self.finish()?;
        if status.success() {
            Ok(0)
        } else {
            Err(io::Error::other(format!(
                "7-Zip exited with {status}: {}",
                super::listing::first_error_line(&stderr)
            )))
        }
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            // Closing our end first unblocks a child stuck writing stdout
            self.stdout.take();
            if let Err(e) = self.child.kill() {
                log::debug!("Kill of 7-Zip (pid {}) failed: {e}", self.child.id());
            }
            let _ = self.child.wait();
        }
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
    }
}
