//! Invocation of the external `exiftool` binary.
//!
//! The tool is run once per image with an explicit timeout;
//! a hung process is killed and reported as a failure of
//! that image only.

use std::{
    ffi::OsStr,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    image::ThermalImage,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct Exiftool {
    pub path: PathBuf,
    pub timeout: Duration,
}

impl Exiftool {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Exiftool {
            path: path.into(),
            timeout,
        }
    }

    /// Extract calibration fields and the raw frame of one
    /// image via `exiftool -b -j`.
    pub fn extract(&self, image: &Path) -> Result<ThermalImage> {
        let stdout = self.run(&[OsStr::new("-b"), OsStr::new("-j"), image.as_os_str()])?;
        let mut records = ThermalImage::from_exiftool_json(&stdout[..])?;
        if records.len() != 1 {
            return Err(PipelineError::ExtractionTool(format!(
                "expected one record for {}, found {}",
                image.display(),
                records.len()
            )));
        }
        let mut thermal = records.remove(0)?;
        thermal.source = image.to_path_buf();
        Ok(thermal)
    }

    /// Run the tool and collect its standard output.
    ///
    /// The timeout covers both the output and the exit. The
    /// process is killed and reaped on every return path; a
    /// grandchild still holding the pipe is left to the reader
    /// thread and does not delay the caller.
    pub fn run<I, S>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let deadline = Instant::now() + self.timeout;
        let child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PipelineError::ExtractionTool(format!(
                    "could not start `{}`: {}",
                    self.path.display(),
                    e
                ))
            })?;
        let mut child = ReapOnDrop(child);

        let mut stdout = child
            .0
            .stdout
            .take()
            .ok_or_else(|| PipelineError::ExtractionTool("stdout not captured".into()))?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = vec![];
            let res = stdout.read_to_end(&mut buf).map(|_| buf);
            let _ = tx.send(res);
        });

        let output = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(output) => output?,
            Err(RecvTimeoutError::Timeout) => return Err(self.timed_out()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PipelineError::ExtractionTool("stdout reader panicked".into()))
            }
        };

        let status = loop {
            if let Some(status) = child.0.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        };
        if !status.success() {
            return Err(PipelineError::ExtractionTool(format!(
                "`{}` exited with {}",
                self.path.display(),
                status
            )));
        }

        debug!(bytes = output.len(), "exiftool finished");
        Ok(output)
    }

    fn timed_out(&self) -> PipelineError {
        PipelineError::ExtractionTool(format!(
            "`{}` timed out after {:?}",
            self.path.display(),
            self.timeout
        ))
    }
}

/// Kills and reaps the child when dropped.
struct ReapOnDrop(Child);

impl Drop for ReapOnDrop {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
        }
        let _ = self.0.wait();
    }
}
