// External transcode step: concatenated segments arrive as an MP4
// container and the caller may want a different one. ffmpeg does the
// remux; the binary is located and re-validated on every invocation so a
// PATH change between runs cannot hand arguments to the wrong program.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::FetchError;
use crate::error::truncate;

/// How much of the transcoder's stderr survives into error messages.
const STDERR_EXCERPT_LEN: usize = 200;

/// Converts one finished media file into another container/codec.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), FetchError>;
}

/// `Transcoder` backed by the system ffmpeg: strips video streams and
/// re-encodes audio to FLAC.
#[derive(Debug, Default)]
pub struct FfmpegTranscoder {
    binary: Option<PathBuf>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary instead of env/PATH discovery.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn locate(&self) -> Result<PathBuf, FetchError> {
        let binary = match &self.binary {
            Some(explicit) => explicit.clone(),
            None => process_utils::find_transcoder().map_err(|e| {
                FetchError::TranscoderUnavailable {
                    reason: e.to_string(),
                }
            })?,
        };
        process_utils::validate_executable(&binary).map_err(|e| {
            FetchError::TranscoderUnavailable {
                reason: format!("{}: {e}", binary.display()),
            }
        })?;
        Ok(binary)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), FetchError> {
        let binary = self.locate()?;
        debug!(binary = %binary.display(), input = %input.display(), output = %output.display(), "Transcoding");

        let result = process_utils::tokio_command(&binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-c:a")
            .arg("flac")
            .arg(output)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(FetchError::Io {
                source: std::io::Error::other(format!(
                    "ffmpeg exited with {}: {}",
                    result.status,
                    truncate(stderr.trim(), STDERR_EXCERPT_LEN)
                )),
            });
        }
        Ok(())
    }
}
