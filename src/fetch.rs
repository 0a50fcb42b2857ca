// src/fetch.rs
// Single-page retrieval + normalization. One outbound request, one artifact
// write, no retries here: retry policy is owned by the orchestrator.
//
// Normalization must be stable across runs: the same raw markup always
// cleans to the same bytes and therefore the same digest. That determinism
// is the correctness anchor for change detection.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::Settings;
use crate::error::FetchError;
use crate::types::{CaptureMeta, ContentDigest, Target};

/// Raw pre-observation payload produced by one successful fetch.
#[derive(Debug, Clone)]
pub struct Capture {
    pub title: Option<String>,
    /// Markup with non-content elements stripped; the digest input.
    pub markup: String,
    /// Plain text extracted from the cleaned markup; the diff input.
    pub text: String,
    pub digest: ContentDigest,
    pub artifact_path: Option<PathBuf>,
    pub meta: CaptureMeta,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, target: &Target) -> Result<Capture, FetchError>;
}

// ------------------------------------------------------------
// Normalization
// ------------------------------------------------------------

/// Strip non-content elements: script/style/noscript blocks including their
/// contents, plus meta/link tags and comments. Tag structure is otherwise
/// retained so the digest tracks the page, not just its prose.
pub fn clean_markup(raw: &str) -> String {
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<noscript\b[^>]*>.*?</noscript>",
        )
        .unwrap()
    });
    static RE_VOID: OnceCell<Regex> = OnceCell::new();
    let re_void = RE_VOID.get_or_init(|| Regex::new(r"(?is)<(?:meta|link)\b[^>]*>").unwrap());
    static RE_COMMENT: OnceCell<Regex> = OnceCell::new();
    let re_comment = RE_COMMENT.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

    let out = re_blocks.replace_all(raw, "");
    let out = re_void.replace_all(&out, "");
    let out = re_comment.replace_all(&out, "");
    out.trim().to_string()
}

/// Extract plain text from cleaned markup: tags become line breaks, entities
/// are decoded, every line is trimmed and empty lines are dropped.
pub fn extract_text(markup: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());

    let without_tags = re_tags.replace_all(markup, "\n");
    let decoded = html_escape::decode_html_entities(&without_tags);

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t]+").unwrap());

    decoded
        .lines()
        .map(|line| re_ws.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `<title>` text, entity-decoded and trimmed.
pub fn extract_title(raw: &str) -> Option<String> {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    let re_title =
        RE_TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
    let captured = re_title.captures(raw)?;
    let title = html_escape::decode_html_entities(captured.get(1)?.as_str())
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

// ------------------------------------------------------------
// HTTP fetcher
// ------------------------------------------------------------

pub struct HttpFetcher {
    http: reqwest::Client,
    artifact_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("sitewatch/0.1 (competitor monitoring bot)")
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| anyhow::anyhow!("building fetch client: {e}"))?;
        Ok(Self {
            http,
            artifact_dir: settings.artifact_dir.clone(),
        })
    }

    /// Best-effort artifact write; a failed write never fails the fetch.
    async fn write_artifact(&self, target: &Target, markup: &str) -> Option<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.artifact_dir.join(format!("{}_{stamp}.html", target.id));
        if let Err(e) = tokio::fs::create_dir_all(&self.artifact_dir).await {
            tracing::warn!(error = %e, "artifact dir");
            return None;
        }
        match tokio::fs::write(&path, markup).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "artifact write");
                None
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, target: &Target) -> Result<Capture, FetchError> {
        let started = Instant::now();

        let resp = self
            .http
            .get(target.url.clone())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let raw = resp.text().await.map_err(FetchError::from_reqwest)?;
        let fetch_ms = started.elapsed().as_millis() as u64;

        let title = extract_title(&raw);
        let markup = clean_markup(&raw);
        let text = extract_text(&markup);
        let digest = ContentDigest::of(&markup);

        let artifact_path = self.write_artifact(target, &markup).await;

        metrics::histogram!("sitewatch_fetch_ms").record(fetch_ms as f64);
        tracing::debug!(
            target = %target.id,
            url = %target.url,
            status = status.as_u16(),
            bytes = raw.len(),
            fetch_ms,
            digest = %digest,
            "page fetched"
        );

        Ok(Capture {
            title,
            markup,
            text,
            digest,
            artifact_path,
            meta: CaptureMeta {
                http_status: status.as_u16(),
                content_bytes: raw.len(),
                fetch_ms,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Acme &amp; Co</title>
        <meta charset="utf-8">
        <link rel="stylesheet" href="app.css">
        <style>body { color: red; }</style>
        <script>track("visit");</script>
    </head><body>
        <!-- hero -->
        <h1>Our price is $10/mo</h1>
        <p>Simple &amp; fair   pricing.</p>
    </body></html>"#;

    #[test]
    fn clean_markup_strips_non_content() {
        let cleaned = clean_markup(PAGE);
        assert!(!cleaned.contains("track(\"visit\")"));
        assert!(!cleaned.contains("color: red"));
        assert!(!cleaned.contains("<meta"));
        assert!(!cleaned.contains("<link"));
        assert!(!cleaned.contains("hero"));
        assert!(cleaned.contains("<h1>Our price is $10/mo</h1>"));
    }

    #[test]
    fn extract_text_decodes_and_collapses() {
        let text = extract_text(&clean_markup(PAGE));
        assert!(text.contains("Our price is $10/mo"));
        assert!(text.contains("Simple & fair pricing."));
        assert!(!text.contains('<'));
        assert!(!text.lines().any(|l| l.trim().is_empty()));
    }

    #[test]
    fn normalization_is_deterministic() {
        let a = ContentDigest::of(&clean_markup(PAGE));
        let b = ContentDigest::of(&clean_markup(PAGE));
        assert_eq!(a, b);

        // Content-free noise must not perturb the digest.
        let noisy = PAGE.replace(
            "<script>track(\"visit\");</script>",
            "<script>track(\"other\");</script>",
        );
        assert_eq!(a, ContentDigest::of(&clean_markup(&noisy)));
    }

    #[test]
    fn title_extraction() {
        assert_eq!(extract_title(PAGE).as_deref(), Some("Acme & Co"));
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
    }

    #[tokio::test]
    async fn artifact_write_lands_in_the_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            artifact_dir: dir.path().join("artifacts"),
            ..Settings::default()
        };
        let fetcher = HttpFetcher::new(&settings).unwrap();
        let target = Target::new(
            "acme",
            url::Url::parse("https://acme.example/pricing").unwrap(),
        );

        let path = fetcher
            .write_artifact(&target, "<h1>capture</h1>")
            .await
            .expect("write into a fresh dir succeeds");
        assert!(path.starts_with(dir.path().join("artifacts")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&target.id.to_string()));
        assert!(name.ends_with(".html"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<h1>capture</h1>");
    }

    #[tokio::test]
    async fn failed_artifact_write_degrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the artifact dir should go: create_dir_all fails.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();

        let settings = Settings {
            artifact_dir: blocked.join("nested"),
            ..Settings::default()
        };
        let fetcher = HttpFetcher::new(&settings).unwrap();
        let target = Target::new("acme", url::Url::parse("https://acme.example").unwrap());

        assert!(fetcher.write_artifact(&target, "<p>x</p>").await.is_none());
    }
}
