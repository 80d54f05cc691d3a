// Streams resolved byte sources to disk. Direct manifests stream into the
// final path; segmented manifests concatenate init + media segments into a
// sibling temp file first, then finalize by rename or transcode. A failed
// transcode never discards downloaded audio: the temp file is salvaged
// under an `.m4a` name and reported in the error.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::FetchError;
use crate::manifest::Manifest;
use crate::progress::{ProgressTracker, RetrievalProgress};
use crate::transcode::{FfmpegTranscoder, Transcoder};

const TEMP_SUFFIX: &str = ".m4a.tmp";

/// Downloads the byte sources a [`Manifest`] names into one output file.
pub struct Retriever {
    client: Client,
    transcoder: Box<dyn Transcoder>,
    progress: ProgressTracker,
}

impl Retriever {
    pub fn new(client: Client) -> Self {
        Self::with_transcoder(client, Box::new(FfmpegTranscoder::new()))
    }

    pub fn with_transcoder(client: Client, transcoder: Box<dyn Transcoder>) -> Self {
        Self {
            client,
            transcoder,
            progress: ProgressTracker::new(),
        }
    }

    /// Watch byte counts and throughput while a retrieval runs.
    pub fn subscribe_progress(&self) -> watch::Receiver<RetrievalProgress> {
        self.progress.subscribe()
    }

    /// Retrieve `manifest` into `output`. Returns the path actually
    /// written, which is always `output` on success.
    pub async fn retrieve(
        &mut self,
        manifest: &Manifest,
        output: &Path,
    ) -> Result<PathBuf, FetchError> {
        // Each run accounts from zero; observers keep their subscription.
        self.progress.reset();
        match manifest {
            Manifest::Direct(url) => {
                self.stream_to_file(url, output, "direct retrieval").await?;
                info!(output = %output.display(), bytes = self.progress.bytes_written(), "Retrieval complete");
                Ok(output.to_path_buf())
            }
            Manifest::Segmented {
                init_url,
                segment_urls,
            } => self.retrieve_segmented(init_url, segment_urls, output).await,
        }
    }

    async fn retrieve_segmented(
        &mut self,
        init_url: &str,
        segment_urls: &[String],
        output: &Path,
    ) -> Result<PathBuf, FetchError> {
        let temp = temp_path(output);
        debug!(segments = segment_urls.len(), temp = %temp.display(), "Segmented retrieval");

        if let Err(e) = self.write_segments(init_url, segment_urls, &temp).await {
            // A partial concatenation is useless; only a complete one is
            // worth finalizing or salvaging.
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        self.finalize(&temp, output).await?;
        info!(output = %output.display(), bytes = self.progress.bytes_written(), "Retrieval complete");
        Ok(output.to_path_buf())
    }

    async fn write_segments(
        &mut self,
        init_url: &str,
        segment_urls: &[String],
        temp: &Path,
    ) -> Result<(), FetchError> {
        let mut file = File::create(temp).await?;
        self.stream_into(init_url, &mut file, "init segment").await?;
        for url in segment_urls {
            self.stream_into(url, &mut file, "media segment").await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn stream_to_file(
        &mut self,
        url: &str,
        path: &Path,
        operation: &'static str,
    ) -> Result<(), FetchError> {
        let mut file = File::create(path).await?;
        self.stream_into(url, &mut file, operation).await?;
        file.flush().await?;
        Ok(())
    }

    async fn stream_into(
        &mut self,
        url: &str,
        file: &mut File,
        operation: &'static str,
    ) -> Result<(), FetchError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::http_status(response.status(), url, operation));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            self.progress.record(chunk.len() as u64);
        }
        Ok(())
    }

    /// Turn the complete temp concatenation into the requested output.
    /// Same container: plain rename. Different container: transcode, and
    /// salvage the temp as `.m4a` if the transcode fails.
    async fn finalize(&self, temp: &Path, output: &Path) -> Result<(), FetchError> {
        let same_container = output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("m4a"));
        if same_container {
            tokio::fs::rename(temp, output).await?;
            return Ok(());
        }

        match self.transcoder.transcode(temp, output).await {
            Ok(()) => {
                tokio::fs::remove_file(temp).await?;
                Ok(())
            }
            Err(e) => {
                let salvaged = output.with_extension("m4a");
                warn!(error = %e, salvaged = %salvaged.display(), "Transcode failed, keeping raw audio");
                tokio::fs::rename(temp, &salvaged).await?;
                Err(FetchError::Transcode {
                    reason: e.to_string(),
                    salvaged,
                })
            }
        }
    }
}

/// Temp path for the segment concatenation, next to the final output.
fn temp_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, create_client};
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Minimal one-request-per-connection HTTP stub. Paths without a canned
    /// body answer 500.
    async fn spawn_stub(routes: Vec<(&'static str, &'static [u8])>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Vec<(String, Vec<u8>)> = routes
            .into_iter()
            .map(|(path, body)| (path.to_string(), body.to_vec()))
            .collect();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");

                    let response = match routes.iter().find(|(p, _)| p == path) {
                        Some((_, body)) => {
                            let mut r = format!(
                                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            r.extend_from_slice(body);
                            r
                        }
                        None => b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(&self, input: &Path, output: &Path) -> Result<(), FetchError> {
            tokio::fs::copy(input, output).await?;
            Ok(())
        }
    }

    struct FailingTranscoder;

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn transcode(&self, _input: &Path, _output: &Path) -> Result<(), FetchError> {
            Err(FetchError::Io {
                source: std::io::Error::other("codec exploded"),
            })
        }
    }

    fn retriever(transcoder: Box<dyn Transcoder>) -> Retriever {
        let client = create_client(&ClientConfig::default()).unwrap();
        Retriever::with_transcoder(client, transcoder)
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/tmp/song.flac")),
            Path::new("/tmp/song.flac.m4a.tmp")
        );
    }

    #[tokio::test]
    async fn same_container_finalize_renames() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("song.m4a");
        let temp = temp_path(&output);
        tokio::fs::write(&temp, b"audio").await.unwrap();

        let r = retriever(Box::new(FailingTranscoder));
        r.finalize(&temp, &output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"audio");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn transcode_finalize_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("song.flac");
        let temp = temp_path(&output);
        tokio::fs::write(&temp, b"audio").await.unwrap();

        let r = retriever(Box::new(CopyTranscoder));
        r.finalize(&temp, &output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"audio");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn failed_transcode_salvages_raw_audio() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("song.flac");
        let temp = temp_path(&output);
        tokio::fs::write(&temp, b"audio").await.unwrap();

        let r = retriever(Box::new(FailingTranscoder));
        let err = r.finalize(&temp, &output).await.unwrap_err();

        let FetchError::Transcode { salvaged, reason } = err else {
            panic!("expected Transcode error");
        };
        assert_eq!(salvaged, dir.path().join("song.m4a"));
        assert!(reason.contains("codec exploded"));
        assert_eq!(tokio::fs::read(&salvaged).await.unwrap(), b"audio");
        assert!(!output.exists());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn segments_concatenate_in_request_order() {
        let base = spawn_stub(vec![
            ("/init", b"INIT".as_slice()),
            ("/seg-1", b"AAA".as_slice()),
            ("/seg-2", b"BBB".as_slice()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        // Same container, so finalize is a rename and no transcoder runs.
        let output = dir.path().join("song.m4a");
        let manifest = Manifest::Segmented {
            init_url: format!("{base}/init"),
            segment_urls: vec![format!("{base}/seg-1"), format!("{base}/seg-2")],
        };

        let mut r = retriever(Box::new(FailingTranscoder));
        let path = r.retrieve(&manifest, &output).await.unwrap();

        assert_eq!(path, output);
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"INITAAABBB");
        assert!(!temp_path(&output).exists());
    }

    #[tokio::test]
    async fn failed_segment_deletes_temp_and_propagates() {
        // seg-2 has no canned body, so the stub answers 500 mid-sequence.
        let base = spawn_stub(vec![
            ("/init", b"INIT".as_slice()),
            ("/seg-1", b"AAA".as_slice()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("song.m4a");
        let manifest = Manifest::Segmented {
            init_url: format!("{base}/init"),
            segment_urls: vec![
                format!("{base}/seg-1"),
                format!("{base}/seg-2"),
                format!("{base}/seg-3"),
            ],
        };

        let mut r = retriever(Box::new(FailingTranscoder));
        let err = r.retrieve(&manifest, &output).await.unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { .. }));
        assert!(!temp_path(&output).exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn reused_retriever_reports_per_run_bytes() {
        let base = spawn_stub(vec![("/a", b"0123456789".as_slice())]).await;
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::Direct(format!("{base}/a"));

        let mut r = retriever(Box::new(FailingTranscoder));
        let rx = r.subscribe_progress();

        r.retrieve(&manifest, &dir.path().join("one.m4a")).await.unwrap();
        assert_eq!(rx.borrow().bytes_written, 10);

        // A second run over the same retriever starts from zero, not 20.
        r.retrieve(&manifest, &dir.path().join("two.m4a")).await.unwrap();
        assert_eq!(rx.borrow().bytes_written, 10);
    }
}
