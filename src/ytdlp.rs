//! Thin async wrapper around the `yt-dlp` executable.
//!
//! Two invocations are supported: dumping the metadata document for a URL
//! (every known format included) and streaming the bytes of one format to
//! stdout. Both spawn the child with `kill_on_drop`, so abandoning the future
//! or the stream terminates the process instead of orphaning it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, future, stream};
use serde::{Deserialize, Deserializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::provider::ByteStream;

pub const DEFAULT_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// The `yt-dlp --dump-single-json` document. Only the fields the pipeline
/// reads are declared; everything else in the payload is ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExtractionResult {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub original_url: Option<String>,
    pub formats: Vec<RawFormat>,
}

/// One entry of the `formats` array as reported by the provider extractor.
///
/// Numeric fields go through lenient deserializers because extractors are not
/// consistent about emitting integers versus floats.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawFormat {
    pub format_id: String,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub vbr: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub asr: Option<f64>,
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v.round() as u32))
}

/// Handle to a `yt-dlp` binary plus the limits applied to metadata runs.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    timeout: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Caps how long a metadata extraction may run before the child is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Arguments for the metadata run: error tolerant, every format probed,
    /// a single JSON document, nothing else on either stream.
    pub fn extract_args(url: &str) -> Vec<String> {
        [
            "--ignore-errors",
            "--check-all-formats",
            "--dump-single-json",
            "--quiet",
            "--no-warnings",
            "--",
            url,
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }

    /// Arguments that write the raw bytes of `format_id` to stdout.
    pub fn stream_args(url: &str, format_id: &str) -> Vec<String> {
        [
            "--quiet",
            "--no-warnings",
            "--format",
            format_id,
            "--output",
            "-",
            "--",
            url,
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }

    /// Runs the metadata extraction for `url` and parses the result.
    ///
    /// Any stderr output is treated as a failure even when the exit status is
    /// zero. No retries happen here.
    pub async fn extract(&self, url: &str) -> Result<ExtractionResult, ExtractError> {
        let program = self.program_name();
        let mut command = Command::new(&self.program);
        command
            .args(Self::extract_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%program, %url, "spawning metadata extraction");
        let child = command.spawn().map_err(|source| ExtractError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Dropping `wait_with_output` on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|err| {
                ExtractError::tool(&program, format!("waiting for process: {err}"))
            })?,
            Err(_) => {
                warn!(%program, %url, timeout = ?self.timeout, "metadata extraction timed out");
                return Err(ExtractError::tool(
                    &program,
                    format!("timed out after {}s", self.timeout.as_secs_f64()),
                ));
            }
        };

        let result = parse_output(&program, &output)?;
        info!(
            %program,
            %url,
            title = %result.title,
            formats = result.formats.len(),
            "metadata extraction finished"
        );
        Ok(result)
    }

    /// Starts streaming the bytes of `format_id` for `url`.
    ///
    /// The returned stream yields stdout as the consumer pulls it. After EOF
    /// the exit status is checked and a failure surfaces as a final error
    /// item carrying whatever the tool wrote to stderr.
    pub fn open_format(&self, url: &str, format_id: &str) -> io::Result<ByteStream> {
        let program = self.program_name();
        let mut child = Command::new(&self.program)
            .args(Self::stream_args(url, format_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(%program, %url, %format_id, "streaming format");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;
        let stderr_task = tokio::spawn(drain_stderr(stderr, program.clone()));

        let body = ReaderStream::with_capacity(stdout, STREAM_CHUNK_SIZE);
        let trailer = stream::once(async move {
            match child.wait().await {
                Ok(status) if status.success() => None::<io::Result<Bytes>>,
                Ok(status) => {
                    let stderr = stderr_task.await.unwrap_or_default();
                    Some(Err(io::Error::other(format!(
                        "{program} exited with {status}: {}",
                        stderr.trim()
                    ))))
                }
                Err(err) => Some(Err(err)),
            }
        })
        .filter_map(future::ready);

        Ok(Box::pin(body.chain(trailer)))
    }

    /// Returns the trimmed `--version` output.
    pub async fn version(&self) -> Result<String, ExtractError> {
        let program = self.program_name();
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::tool(
                &program,
                format!("--version exited with {}", output.status),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

fn parse_output(program: &str, output: &Output) -> Result<ExtractionResult, ExtractError> {
    if !output.stderr.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(%program, stderr = %stderr.trim(), "tool wrote to stderr");
        return Err(ExtractError::tool(program, stderr.trim()));
    }
    if !output.status.success() {
        return Err(ExtractError::tool(
            program,
            format!("exited with {}", output.status),
        ));
    }
    serde_json::from_slice(&output.stdout).map_err(|source| ExtractError::Parse {
        program: program.to_owned(),
        source,
    })
}

async fn drain_stderr(mut stderr: impl AsyncRead + Unpin, program: String) -> String {
    let mut buf = Vec::new();
    if let Err(err) = stderr.read_to_end(&mut buf).await {
        warn!(%program, %err, "reading stderr failed");
    }
    let text = String::from_utf8_lossy(&buf).into_owned();
    if !text.trim().is_empty() {
        warn!(%program, stderr = %text.trim(), "tool wrote to stderr while streaming");
    }
    text
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{TempDir, tempdir};

    const SAMPLE_JSON: &str = r#"{
  "id": "alpha",
  "title": "Alpha Title",
  "duration": 120.5,
  "original_url": "https://www.youtube.com/watch?v=alpha",
  "formats": [
    {
      "format_id": "sb0",
      "format_note": "storyboard",
      "ext": "mhtml",
      "vcodec": "none",
      "acodec": "none"
    },
    {
      "format_id": "137",
      "ext": "mp4",
      "protocol": "https",
      "resolution": "1920x1080",
      "vcodec": "avc1.640028",
      "acodec": "none",
      "width": 1920,
      "height": 1080,
      "fps": 30,
      "vbr": 4000.5,
      "filesize": 1048576.0
    },
    {
      "format_id": "140",
      "ext": "m4a",
      "vcodec": "none",
      "acodec": "mp4a.40.2",
      "abr": 129.5,
      "asr": 44100,
      "filesize_approx": 2048
    }
  ]
}"#;

    fn install_ytdlp_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}\n");
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn stub(body: &str) -> (TempDir, YtDlp) {
        let dir = tempdir().unwrap();
        let path = install_ytdlp_stub(dir.path(), body);
        (dir, YtDlp::new(path))
    }

    fn json_stub() -> String {
        format!("cat <<'JSON'\n{SAMPLE_JSON}\nJSON")
    }

    #[tokio::test]
    async fn extract_parses_metadata_document() {
        let (_dir, ytdlp) = stub(&json_stub());
        let result = ytdlp
            .extract("https://www.youtube.com/watch?v=alpha")
            .await
            .unwrap();

        assert_eq!(result.title, "Alpha Title");
        assert_eq!(result.duration, Some(120.5));
        assert_eq!(result.formats.len(), 3);

        let video = &result.formats[1];
        assert_eq!(video.format_id, "137");
        assert_eq!(video.width, Some(1920));
        assert_eq!(video.fps, Some(30.0));
        assert_eq!(video.filesize, Some(1_048_576));
        assert_eq!(video.abr, None);

        let audio = &result.formats[2];
        assert_eq!(audio.filesize, None);
        assert_eq!(audio.filesize_approx, Some(2048));
        assert_eq!(audio.asr, Some(44100.0));
    }

    #[tokio::test]
    async fn extract_passes_fixed_flags_and_url() {
        let body = format!(
            "printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"\n{}",
            json_stub()
        );
        let (dir, ytdlp) = stub(&body);
        let url = "https://youtu.be/alpha";
        ytdlp.extract(url).await.unwrap();

        let recorded = fs::read_to_string(dir.path().join("args.txt")).unwrap();
        let args: Vec<&str> = recorded.lines().collect();
        assert_eq!(args, YtDlp::extract_args(url));
        assert_eq!(args.last().copied(), Some(url));
    }

    #[tokio::test]
    async fn extract_fails_on_any_stderr_output() {
        let body = format!("echo 'WARNING: something odd' >&2\n{}", json_stub());
        let (_dir, ytdlp) = stub(&body);
        let err = ytdlp.extract("https://youtu.be/alpha").await.unwrap_err();
        match err {
            ExtractError::Tool { message, .. } => assert!(message.contains("something odd")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_fails_on_non_zero_exit() {
        let (_dir, ytdlp) = stub("exit 3");
        let err = ytdlp.extract("https://youtu.be/alpha").await.unwrap_err();
        assert!(matches!(err, ExtractError::Tool { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn extract_reports_malformed_json_as_parse_error() {
        let (_dir, ytdlp) = stub("echo '{\"title\": \"missing formats\"}'");
        let err = ytdlp.extract("https://youtu.be/alpha").await.unwrap_err();
        assert!(matches!(err, ExtractError::Parse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn extract_reports_missing_binary_as_spawn_error() {
        let dir = tempdir().unwrap();
        let ytdlp = YtDlp::new(dir.path().join("does-not-exist"));
        let err = ytdlp.extract("https://youtu.be/alpha").await.unwrap_err();
        assert!(matches!(err, ExtractError::Spawn { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn extract_times_out_and_fails() {
        let (_dir, ytdlp) = stub("sleep 10");
        let ytdlp = ytdlp.with_timeout(Duration::from_millis(200));
        let err = ytdlp.extract("https://youtu.be/alpha").await.unwrap_err();
        match err {
            ExtractError::Tool { message, .. } => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// True while `pid` exists and has not exited. A killed child can
    /// linger as a zombie until it is reaped, which counts as gone.
    #[cfg(target_os = "linux")]
    fn process_running(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_extract_kills_the_child() {
        let (dir, ytdlp) = stub("echo $$ > \"$(dirname \"$0\")/pid.txt\"\nexec sleep 30");
        let pid_file = dir.path().join("pid.txt");

        let task = tokio::spawn(async move { ytdlp.extract("https://youtu.be/alpha").await });
        let mut pid = String::new();
        for _ in 0..250 {
            if let Ok(content) = fs::read_to_string(&pid_file)
                && !content.trim().is_empty()
            {
                pid = content.trim().to_owned();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!pid.is_empty(), "stub never started");
        assert!(process_running(&pid));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let mut running = true;
        for _ in 0..250 {
            running = process_running(&pid);
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!running, "child {pid} survived the dropped extraction");
    }

    #[tokio::test]
    async fn open_format_streams_stdout() {
        let body = r#"
if [[ " $* " == *" --format 137 "* ]]; then
  printf 'hello '
  printf 'world'
  exit 0
fi
echo "unexpected args: $*" >&2
exit 1
"#;
        let (_dir, ytdlp) = stub(body);
        let stream = ytdlp
            .open_format("https://youtu.be/alpha", "137")
            .unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let data: Vec<u8> = chunks.concat();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn open_format_surfaces_failure_after_partial_output() {
        let body = "printf 'partial'\necho 'ERROR: connection reset' >&2\nexit 1";
        let (_dir, ytdlp) = stub(body);
        let mut stream = ytdlp.open_format("https://youtu.be/alpha", "137").unwrap();

        let mut received = Vec::new();
        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => received.extend_from_slice(&chunk),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        assert_eq!(received, b"partial");
        let failure = failure.expect("stream should end with an error");
        assert!(failure.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn version_returns_trimmed_output() {
        let (_dir, ytdlp) = stub("echo '2025.01.01'");
        assert_eq!(ytdlp.version().await.unwrap(), "2025.01.01");
    }
}
