//! Media sources

use super::{MediaSource, Throttle};
use crate::error::ServiceError;
use crate::types::MediaAsset;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local video files
///
/// Title and duration come from an optional `<file>.json` sidecar
/// (`{"title": "...", "durationSecs": 1247}`); without one the title is the
/// file stem and the duration is unknown (0).
#[derive(Debug, Clone, Default)]
pub struct FileMediaSource {
    root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    title: Option<String>,
    #[serde(default)]
    duration_secs: u32,
}

impl FileMediaSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative references against `root`
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference.strip_prefix("file://").unwrap_or(reference));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaSource for FileMediaSource {
    async fn resolve(&self, reference: &str) -> Result<MediaAsset, ServiceError> {
        let path = self.path_for(reference);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ServiceError::NotFound(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(ServiceError::NotFound(format!("{} is not a file", path.display())));
        }

        let mut sidecar_path = path.clone().into_os_string();
        sidecar_path.push(".json");
        let sidecar = match tokio::fs::read_to_string(&sidecar_path).await {
            Ok(text) => serde_json::from_str::<Sidecar>(&text)
                .map_err(|e| ServiceError::Decode(format!("sidecar for {}: {e}", path.display())))?,
            Err(_) => Sidecar {
                title: None,
                duration_secs: 0,
            },
        };

        let title = sidecar.title.unwrap_or_else(|| {
            path.file_stem()
                .map_or_else(|| reference.to_string(), |s| s.to_string_lossy().into_owned())
        });
        tracing::debug!(path = %path.display(), duration = sidecar.duration_secs, "media resolved");
        Ok(MediaAsset::new(reference, title, sidecar.duration_secs)
            .with_locator(format!("file://{}", path.display())))
    }
}

/// YouTube videos through the Data API
pub struct YouTubeMediaSource {
    client: Client,
    base: String,
    api_key: String,
    throttle: Option<Throttle>,
}

impl YouTubeMediaSource {
    /// Create a source
    ///
    /// # Errors
    /// Returns `ServiceError::Http` if the HTTP client cannot be built.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            throttle: None,
        })
    }

    /// Cap Data API calls at `requests` per minute; 0 removes the cap
    #[must_use]
    pub fn with_rate_limit(mut self, requests: u32) -> Self {
        self.throttle = Throttle::per_minute(requests);
        self
    }
}

#[async_trait]
impl MediaSource for YouTubeMediaSource {
    async fn resolve(&self, reference: &str) -> Result<MediaAsset, ServiceError> {
        let id = video_id(reference)
            .ok_or_else(|| ServiceError::NotFound(format!("not a YouTube reference: {reference}")))?;
        if crate::config::is_placeholder(&self.api_key) {
            return Err(ServiceError::MissingCredential("YOUTUBE_API_KEY".to_string()));
        }
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }

        let response = self
            .client
            .get(format!("{}/videos", self.base))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::status(status.as_u16(), &body));
        }
        let body: serde_json::Value = response.json().await?;

        let item = body["items"]
            .get(0)
            .ok_or_else(|| ServiceError::NotFound(format!("video {id}")))?;
        let title = item["snippet"]["title"].as_str().unwrap_or(id).to_string();
        let duration = item["contentDetails"]["duration"]
            .as_str()
            .and_then(parse_iso8601_duration)
            .ok_or_else(|| ServiceError::Decode(format!("video {id} has no duration")))?;

        Ok(MediaAsset::new(reference, title, duration)
            .with_locator(format!("https://www.youtube.com/watch?v={id}")))
    }
}

/// Routes YouTube references to the Data API and everything else to files
pub struct MediaResolver {
    files: FileMediaSource,
    youtube: Option<YouTubeMediaSource>,
}

impl MediaResolver {
    #[must_use]
    pub fn new(files: FileMediaSource) -> Self {
        Self { files, youtube: None }
    }

    #[must_use]
    pub fn with_youtube(mut self, youtube: YouTubeMediaSource) -> Self {
        self.youtube = Some(youtube);
        self
    }

    fn is_youtube(reference: &str) -> bool {
        reference.contains("youtube.com/") || reference.contains("youtu.be/")
    }
}

#[async_trait]
impl MediaSource for MediaResolver {
    async fn resolve(&self, reference: &str) -> Result<MediaAsset, ServiceError> {
        match &self.youtube {
            Some(youtube) if Self::is_youtube(reference) => youtube.resolve(reference).await,
            None if Self::is_youtube(reference) => {
                Err(ServiceError::NotFound(format!("no YouTube source configured for {reference}")))
            }
            _ => self.files.resolve(reference).await,
        }
    }
}

/// Video id from a watch URL, short URL, embed URL or bare id
fn video_id(reference: &str) -> Option<&str> {
    let reference = reference.trim();
    let candidate = if let Some((_, rest)) = reference.split_once("v=") {
        rest.split(['&', '#']).next()?
    } else if let Some((_, rest)) = reference
        .split_once("youtu.be/")
        .or_else(|| reference.split_once("/embed/"))
        .or_else(|| reference.split_once("/shorts/"))
    {
        rest.split(['?', '&', '#', '/']).next()?
    } else {
        reference
    };

    let valid = candidate.len() == 11
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(candidate)
}

/// `PT1H2M3S` style durations, in seconds
fn parse_iso8601_duration(text: &str) -> Option<u32> {
    let rest = text.strip_prefix('P')?;
    let (days, time) = match rest.split_once('T') {
        Some((days, time)) => (days, time),
        None => (rest, ""),
    };

    let mut total: u32 = 0;
    let mut accumulate = |part: &str, units: &[(char, u32)]| -> Option<()> {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
            } else {
                let scale = units.iter().find(|(u, _)| *u == c)?.1;
                total = total.checked_add(number.parse::<u32>().ok()?.checked_mul(scale)?)?;
                number.clear();
            }
        }
        number.is_empty().then_some(())
    };
    accumulate(days, &[('D', 86_400)])?;
    accumulate(time, &[('H', 3600), ('M', 60), ('S', 1)])?;
    Some(total)
}
