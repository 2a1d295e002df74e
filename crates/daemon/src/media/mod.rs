//! Media processing for the segment merge daemon
//!
//! Trimming and concatenation are delegated to an external tool; the rest of the
//! crate only sees the [`MediaTool`] trait.

pub mod ffmpeg;

pub use ffmpeg::{
    build_concat_args, build_trim_args, concat_manifest, run_ffmpeg, Ffmpeg,
    MP4_VIDEO_TIMESCALE,
};

use std::path::PathBuf;
use thiserror::Error;

/// Error type for media tool invocations
#[derive(Debug, Error)]
pub enum MediaError {
    /// The tool exited with non-zero status
    #[error("ffmpeg failed with exit code: {0}")]
    Failed(i32),

    /// The tool was terminated by a signal
    #[error("ffmpeg process was terminated by signal")]
    Terminated,

    /// The tool could not be started
    #[error("Failed to start ffmpeg: {0}")]
    Spawn(std::io::Error),

    /// The concat manifest could not be written
    #[error("Failed to write concat manifest: {0}")]
    Manifest(std::io::Error),

    /// The staging file next to the output could not be created or moved into place
    #[error("Failed to stage output: {0}")]
    Staging(std::io::Error),

    /// IO error while waiting for the tool
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cut `[offset, offset + duration)` out of `source` into `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Seconds from the start of `source`
    pub offset_secs: i64,
    /// Length of the cut in seconds
    pub duration_secs: i64,
}

/// Concatenate `inputs` in order into `output`.
///
/// All inputs share one extension and codec parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatRequest {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

/// Lossless trim and concatenation capability.
///
/// Both operations copy streams without re-encoding, normalise negative and
/// discontinuous timestamps, and remux MP4 targets for fast start.
#[allow(async_fn_in_trait)]
pub trait MediaTool {
    async fn trim(&self, request: &TrimRequest) -> Result<(), MediaError>;

    async fn concat(&self, request: &ConcatRequest) -> Result<(), MediaError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    /// A recorded invocation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Trim(TrimRequest),
        Concat(ConcatRequest),
    }

    /// In-memory media tool: records calls and writes placeholder outputs.
    #[derive(Debug, Default)]
    pub struct FakeMedia {
        pub(crate) calls: Mutex<Vec<Call>>,
        /// Outputs whose concat should fail
        pub fail_concat: Vec<PathBuf>,
        /// Sources whose trim should fail
        pub fail_trim: Vec<PathBuf>,
    }

    impl FakeMedia {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn concat_calls(&self) -> Vec<ConcatRequest> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Concat(req) => Some(req),
                    Call::Trim(_) => None,
                })
                .collect()
        }

        pub fn trim_calls(&self) -> Vec<TrimRequest> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Trim(req) => Some(req),
                    Call::Concat(_) => None,
                })
                .collect()
        }

        fn write_placeholder(path: &Path) -> Result<(), MediaError> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, b"media")?;
            Ok(())
        }
    }

    impl MediaTool for FakeMedia {
        async fn trim(&self, request: &TrimRequest) -> Result<(), MediaError> {
            self.calls.lock().unwrap().push(Call::Trim(request.clone()));
            if self.fail_trim.contains(&request.source) {
                return Err(MediaError::Failed(1));
            }
            Self::write_placeholder(&request.output)
        }

        async fn concat(&self, request: &ConcatRequest) -> Result<(), MediaError> {
            self.calls.lock().unwrap().push(Call::Concat(request.clone()));
            if self.fail_concat.contains(&request.output) {
                return Err(MediaError::Failed(1));
            }
            Self::write_placeholder(&request.output)
        }
    }
}
