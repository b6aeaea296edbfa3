use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FontError {
    #[error("unsupported font extension in `{url}`")]
    UnsupportedExtension { url: String },
    #[error("failed to download font `{url}`")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build font download client")]
    Client(#[source] reqwest::Error),
}

/// Inlines the first `@font-face` source of a stylesheet as a `data:` URI.
///
/// Header and footer templates are rendered without network access, so a
/// remote font referenced by the document would otherwise be missing there.
#[derive(Debug, Clone)]
pub struct FontInliner {
    client: reqwest::Client,
}

impl FontInliner {
    pub fn new(download_timeout: Duration) -> Result<Self, FontError> {
        let client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(FontError::Client)?;
        Ok(Self { client })
    }

    /// Returns `styles` with the first `@font-face` url replaced by its content.
    ///
    /// Styles without a font face, or whose font is already a `data:` URI,
    /// are returned unchanged.
    pub async fn inline_first_face(&self, styles: &str) -> Result<String, FontError> {
        let Some(url) = first_font_face_url(styles) else {
            return Ok(styles.to_string());
        };
        if url.starts_with("data:") {
            return Ok(styles.to_string());
        }

        let mime = font_mime_type(&url).ok_or_else(|| FontError::UnsupportedExtension {
            url: url.clone(),
        })?;

        let started_at = Instant::now();
        let body = self.download(&url).await.inspect_err(|err| {
            warn!(
                target = "pressroom::render::fonts",
                op = "fonts::inline_first_face",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                url = %url,
                error = %err,
                "Font download failed"
            );
        })?;

        info!(
            target = "pressroom::render::fonts",
            op = "fonts::inline_first_face",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            url = %url,
            font_bytes = body.len(),
            "Font inlined into print templates"
        );

        let data_uri = format!("data:{mime};base64,{}", STANDARD.encode(&body));
        Ok(styles.replace(&url, &data_uri))
    }

    async fn download(&self, url: &str) -> Result<bytes::Bytes, FontError> {
        let to_error = |source| FontError::Download {
            url: url.to_string(),
            source,
        };
        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(to_error)?
            .bytes()
            .await
            .map_err(to_error)
    }
}

fn first_font_face_url(styles: &str) -> Option<String> {
    let face_at = styles.find("@font-face")?;
    let rest = &styles[face_at..];
    let open = rest.find('{')?;
    let close = rest[open..].find('}').map(|offset| open + offset)?;
    let block = &rest[open + 1..close];

    let url_at = block.find("url(")?;
    let inner = &block[url_at + "url(".len()..];
    let end = inner.find(')')?;
    let url = inner[..end].trim().trim_matches(|c| c == '"' || c == '\'').trim();

    (!url.is_empty()).then(|| url.to_string())
}

fn font_mime_type(url: &str) -> Option<&'static str> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let file_name = path.rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;

    match extension.to_ascii_lowercase().as_str() {
        "woff" => Some("application/font-woff"),
        "woff2" => Some("application/font-woff2"),
        "ttf" => Some("application/font-ttf"),
        "otf" => Some("application/font-otf"),
        _ => None,
    }
}
