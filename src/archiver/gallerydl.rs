use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::traits::{FetchOutcome, MediaFetcher, PostInfo, PostInfoSource};
use crate::config::Config;
use crate::constants::{
    DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_METADATA_TIMEOUT, DEFAULT_USER_MEDIA_TIMEOUT,
};
use crate::error::ArchiveError;
use crate::models::PostId;

/// gallery-dl driven as a subprocess.
///
/// Credentials (cookies file, pixiv refresh token) are passed through to
/// gallery-dl untouched.
#[derive(Debug, Clone)]
pub struct GalleryDl {
    program: String,
    cookies_file: Option<PathBuf>,
    pixiv_refresh_token: Option<String>,
    metadata_timeout: Duration,
    download_timeout: Duration,
    user_media_timeout: Duration,
}

enum RunError {
    Spawn(std::io::Error),
    Timeout,
}

impl GalleryDl {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cookies_file: None,
            pixiv_refresh_token: None,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            user_media_timeout: DEFAULT_USER_MEDIA_TIMEOUT,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.gallery_dl_path.clone(),
            cookies_file: config.cookies_file_path.clone(),
            pixiv_refresh_token: config.pixiv_refresh_token.clone(),
            metadata_timeout: config.metadata_timeout,
            download_timeout: config.download_timeout,
            user_media_timeout: config.user_media_timeout,
        }
    }

    #[must_use]
    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    #[must_use]
    pub fn with_pixiv_refresh_token(mut self, token: Option<String>) -> Self {
        self.pixiv_refresh_token = token;
        self
    }

    #[must_use]
    pub fn with_timeouts(
        mut self,
        metadata: Duration,
        download: Duration,
        user_media: Duration,
    ) -> Self {
        self.metadata_timeout = metadata;
        self.download_timeout = download;
        self.user_media_timeout = user_media;
        self
    }

    /// Check if gallery-dl is available.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn cookie_args(&self) -> Vec<String> {
        let Some(cookies_path) = self.cookies_file.as_deref() else {
            return Vec::new();
        };
        if !cookies_path.exists() {
            warn!(path = %cookies_path.display(), "Cookies file specified but does not exist, continuing without cookies");
            Vec::new()
        } else if cookies_path.is_dir() {
            warn!(path = %cookies_path.display(), "Cookies path is a directory, continuing without cookies");
            Vec::new()
        } else {
            vec![
                "--cookies".to_string(),
                cookies_path.to_string_lossy().to_string(),
            ]
        }
    }

    fn post_args(&self, url: &str, dest: &Path, filename_template: Option<&str>) -> Vec<String> {
        // -D: save straight into dest without per-extractor subdirectories
        let mut args = vec!["-D".to_string(), dest.to_string_lossy().to_string()];
        if let Some(template) = filename_template {
            args.push("-o".to_string());
            args.push(format!("filename={template}"));
        }
        args.push(url.to_string());

        let cookies = self.cookie_args();
        if !cookies.is_empty() {
            args.extend(cookies);
            // Logged in, so the whole conversation can be fetched in one go
            args.push("--option".to_string());
            args.push("extractor.twitter.conversations=true".to_string());
        }
        if let Some(token) = &self.pixiv_refresh_token {
            args.push("-o".to_string());
            args.push(format!("extractor.pixiv.refresh-token={token}"));
        }
        args
    }

    fn user_media_args(
        &self,
        url: &str,
        dest: &Path,
        filename_template: &str,
        known_ids_file: Option<&Path>,
    ) -> Vec<String> {
        let mut args = vec![
            "-D".to_string(),
            dest.to_string_lossy().to_string(),
            "-o".to_string(),
            format!("filename={filename_template}"),
        ];
        args.extend(self.cookie_args());
        if let Some(path) = known_ids_file {
            args.push("--filter".to_string());
            args.push(known_ids_filter(path));
        }
        args.push(url.to_string());
        args
    }

    fn dump_json_args(&self, url: &str) -> Vec<String> {
        let mut args = vec!["--dump-json".to_string(), url.to_string()];
        args.extend(self.cookie_args());
        args
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, RunError> {
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must not leave the process running
            .kill_on_drop(true)
            .spawn()
            .map_err(RunError::Spawn)?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RunError::Spawn(e)),
            Err(_) => Err(RunError::Timeout),
        }
    }

    fn fetch_error(&self, url: &str, timeout: Duration, err: RunError) -> ArchiveError {
        match err {
            RunError::Spawn(source) => ArchiveError::CapabilityUnavailable {
                program: self.program.clone(),
                source,
            },
            RunError::Timeout => ArchiveError::FetchTimeout {
                url: url.to_string(),
                timeout,
            },
        }
    }
}

#[async_trait]
impl MediaFetcher for GalleryDl {
    async fn fetch_post(
        &self,
        url: &str,
        dest: &Path,
        filename_template: Option<&str>,
    ) -> Result<FetchOutcome, ArchiveError> {
        let args = self.post_args(url, dest, filename_template);
        debug!(url = %url, dest = %dest.display(), "Running gallery-dl");

        let output = self
            .run(&args, self.download_timeout)
            .await
            .map_err(|e| self.fetch_error(url, self.download_timeout, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(url = %url, stderr = %stderr.trim(), "gallery-dl stderr");
        }
        Ok(classify_exit(output.status.code(), &stderr))
    }

    async fn fetch_user_media(
        &self,
        url: &str,
        dest: &Path,
        filename_template: &str,
        known: &BTreeSet<PostId>,
    ) -> Result<FetchOutcome, ArchiveError> {
        // gallery-dl evaluates the filter per post, so the crawl itself skips known ids.
        // The file is removed when `ids_file` drops.
        let ids_file = if known.is_empty() {
            None
        } else {
            let file = tempfile::Builder::new()
                .prefix("x-keeper-known-ids-")
                .suffix(".txt")
                .tempfile()
                .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
            let body = known
                .iter()
                .map(PostId::as_str)
                .collect::<Vec<_>>()
                .join("\n");
            tokio::fs::write(file.path(), body)
                .await
                .map_err(|e| ArchiveError::io(file.path(), e))?;
            Some(file)
        };

        let args = self.user_media_args(
            url,
            dest,
            filename_template,
            ids_file.as_ref().map(tempfile::NamedTempFile::path),
        );
        info!(url = %url, known = known.len(), "Starting gallery-dl user media crawl");

        let output = self
            .run(&args, self.user_media_timeout)
            .await
            .map_err(|e| self.fetch_error(url, self.user_media_timeout, e))?;
        drop(ids_file);

        let stderr = String::from_utf8_lossy(&output.stderr);
        let outcome = classify_exit(output.status.code(), &stderr);
        if let FetchOutcome::Error { code, .. } = &outcome {
            error!(url = %url, code = ?code, stderr = %stderr.trim(), "gallery-dl user media crawl failed");
        } else if !stderr.trim().is_empty() {
            debug!(url = %url, stderr = %stderr.trim(), "gallery-dl stderr");
        }
        Ok(outcome)
    }
}

#[async_trait]
impl PostInfoSource for GalleryDl {
    async fn post_info(&self, url: &str) -> Result<PostInfo, ArchiveError> {
        debug!(url = %url, "Fetching post metadata with gallery-dl");

        let output = self
            .run(&self.dump_json_args(url), self.metadata_timeout)
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) => ArchiveError::MetadataFetchError {
                    url: url.to_string(),
                    message: format!("failed to run {}: {source}", self.program),
                },
                RunError::Timeout => ArchiveError::MetadataFetchTimeout {
                    url: url.to_string(),
                    timeout: self.metadata_timeout,
                },
            })?;

        // Exit code 1 means "nothing found", which is not an error here
        if !matches!(output.status.code(), Some(0 | 1)) {
            warn!(
                url = %url,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "gallery-dl returned an unexpected exit code"
            );
        }

        Ok(parse_post_info(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Map a gallery-dl exit code to a fetch outcome.
///
/// 0 is success, 1 means no media was found for the URL.
#[must_use]
pub fn classify_exit(code: Option<i32>, stderr: &str) -> FetchOutcome {
    match code {
        Some(0) => FetchOutcome::Success,
        Some(1) => FetchOutcome::NothingToFetch,
        code => {
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                match code {
                    Some(c) => format!("gallery-dl exited with status {c}"),
                    None => "gallery-dl was terminated by a signal".to_string(),
                }
            } else {
                stderr.to_string()
            };
            FetchOutcome::Error { code, message }
        }
    }
}

/// Python filter expression that rejects posts listed in `path`, one id per line.
fn known_ids_filter(path: &Path) -> String {
    let path = path.to_string_lossy();
    format!("str(tweet_id) not in open({path:?}, encoding='utf-8').read().splitlines()")
}

/// Extract the parent id and author from `--dump-json` output.
///
/// Accepts either one JSON array holding every message or one message per
/// line. A message is `[type, ..., {metadata}]`; a bare metadata object is
/// accepted too. The first message carrying an author wins.
#[must_use]
pub fn parse_post_info(stdout: &str) -> PostInfo {
    for message in dump_messages(stdout) {
        let metadata = match &message {
            Value::Array(items) => match items.last() {
                Some(last @ Value::Object(_)) => last,
                _ => continue,
            },
            Value::Object(_) => &message,
            _ => continue,
        };

        let author_name = metadata
            .get("author")
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .map(String::from);

        // reply_id is the parent post id; 0 marks a root post.
        // (reply_to is the parent author's name, not an id.)
        let parent_id = metadata.get("reply_id").and_then(parse_reply_id);

        if author_name.is_some() {
            return PostInfo {
                parent_id,
                author_name,
            };
        }
    }
    PostInfo::default()
}

fn dump_messages(stdout: &str) -> Vec<Value> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(stdout.trim()) {
        if !items.is_empty() && items.iter().all(Value::is_array) {
            return items;
        }
        return vec![Value::Array(items)];
    }

    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn parse_reply_id(value: &Value) -> Option<PostId> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id != 0).then(|| PostId::new(id.to_string()))
}
