//! FFmpeg media tool
//!
//! Builds and executes ffmpeg command lines for lossless trimming and
//! concat-demuxer merging.

use super::{ConcatRequest, MediaError, MediaTool, TrimRequest};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Fixed video track time base for MP4 outputs so that concatenated files agree
pub const MP4_VIDEO_TIMESCALE: u32 = 90_000;

/// Flags shared by every invocation: quiet output, errors only
const BASE_ARGS: &[&str] = &["-hide_banner", "-nostats", "-loglevel", "error"];

/// FFmpeg-backed [`MediaTool`]
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    /// Use the given binary (a bare name is resolved through `PATH`)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// True when the path has an `.mp4` extension (case-insensitive)
pub fn is_mp4(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false)
}

fn base_args() -> Vec<OsString> {
    let mut args: Vec<OsString> = BASE_ARGS.iter().map(OsString::from).collect();
    args.push("-y".into());
    args
}

/// Stream copy with timestamp normalisation, plus MP4 remux flags, then the output
fn push_output_args(args: &mut Vec<OsString>, output: &Path) {
    args.extend(
        [
            "-fflags",
            "+genpts",
            "-c",
            "copy",
            "-avoid_negative_ts",
            "make_zero",
        ]
        .map(OsString::from),
    );
    if is_mp4(output) {
        args.push("-movflags".into());
        args.push("+faststart".into());
        args.push("-video_track_timescale".into());
        args.push(MP4_VIDEO_TIMESCALE.to_string().into());
    }
    args.push(output.as_os_str().to_owned());
}

/// Build the argument list for a trim
///
/// `-ss` is only emitted for a non-zero offset.
pub fn build_trim_args(request: &TrimRequest) -> Vec<OsString> {
    let mut args = base_args();
    if request.offset_secs > 0 {
        args.push("-ss".into());
        args.push(request.offset_secs.to_string().into());
    }
    args.push("-i".into());
    args.push(request.source.as_os_str().to_owned());
    args.push("-t".into());
    args.push(request.duration_secs.to_string().into());
    push_output_args(&mut args, &request.output);
    args
}

/// Build the argument list for a concat-demuxer merge of `manifest`
pub fn build_concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    let mut args = base_args();
    args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
    args.push(manifest.as_os_str().to_owned());
    push_output_args(&mut args, output);
    args
}

/// Render the concat demuxer manifest: one `file '<path>'` line per input
///
/// Single quotes inside paths are escaped as `'\''`.
pub fn concat_manifest(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Write the manifest for `inputs` (as absolute paths) to a scoped temp file
///
/// The file is removed when the returned handle is dropped.
pub fn write_concat_manifest(inputs: &[PathBuf]) -> Result<NamedTempFile, MediaError> {
    let absolute: Vec<PathBuf> = inputs
        .iter()
        .map(|p| std::path::absolute(p).unwrap_or_else(|_| p.clone()))
        .collect();

    let mut file = tempfile::Builder::new()
        .prefix("concat_")
        .suffix(".txt")
        .tempfile()
        .map_err(MediaError::Manifest)?;
    file.write_all(concat_manifest(&absolute).as_bytes())
        .map_err(MediaError::Manifest)?;
    file.flush().map_err(MediaError::Manifest)?;
    Ok(file)
}

/// Empty sibling of `output`, with the same extension, for ffmpeg to write into
///
/// Removed on drop unless [`publish`] moved it over `output`.
pub fn staging_file(output: &Path) -> Result<NamedTempFile, MediaError> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".segmerge-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(MediaError::Staging)
}

/// Rename a finished staging file over `output`, replacing any previous file
fn publish(staged: NamedTempFile, output: &Path) -> Result<(), MediaError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(MediaError::Staging)?;
    }
    staged
        .persist(output)
        .map_err(|e| MediaError::Staging(e.error))?;
    Ok(())
}

/// Forward each non-empty output line to the log until the pipe closes
async fn drain_lines<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stream == "stderr" {
                    warn!(target: "ffmpeg", "{}", line);
                } else {
                    debug!(target: "ffmpeg", "{}", line);
                }
            }
            Err(e) => {
                warn!(target: "ffmpeg", "{} stream read error: {}", stream, e);
                break;
            }
        }
    }
}

/// Run ffmpeg to completion
///
/// Standard output and standard error are drained by two spawned readers so the
/// child never blocks on a full pipe. Waits for the child and both readers.
///
/// # Errors
/// - the binary cannot be started
/// - the process exits with non-zero status or is killed by a signal
pub async fn run_ffmpeg(binary: &Path, args: &[OsString]) -> Result<(), MediaError> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(MediaError::Spawn)?;

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain_lines(out, "stdout")));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain_lines(err, "stderr")));

    let status = child.wait().await?;

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        if let Err(e) = task.await {
            warn!(target: "ffmpeg", "output reader ended abnormally: {}", e);
        }
    }

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(MediaError::Failed(code)),
            None => Err(MediaError::Terminated),
        }
    }
}

impl MediaTool for Ffmpeg {
    async fn trim(&self, request: &TrimRequest) -> Result<(), MediaError> {
        info!(
            "ffmpeg trim {} -> {} (off={}s dur={}s)",
            request.source.display(),
            request.output.display(),
            request.offset_secs,
            request.duration_secs
        );
        run_ffmpeg(&self.binary, &build_trim_args(request)).await
    }

    async fn concat(&self, request: &ConcatRequest) -> Result<(), MediaError> {
        let manifest = write_concat_manifest(&request.inputs)?;
        let staged = staging_file(&request.output)?;
        run_ffmpeg(
            &self.binary,
            &build_concat_args(manifest.path(), staged.path()),
        )
        .await?;
        publish(staged, &request.output)
    }
}
