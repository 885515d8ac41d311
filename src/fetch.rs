use crate::{
    bundle::{ArchiveKind, ResourceBundle, DEFAULT_NAME},
    config::{AppConfig, DEFAULT_MIRROR_URL},
    error::{FetchError, PatchError},
    progress::{OperationStatus, Phase},
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

const USER_AGENT: &str = concat!("limbus-localizer/", env!("CARGO_PKG_VERSION"));
const CONTENT_FALLBACK_NAME: &str = "LimbusLocalize_latest.7z";
const FONT_FALLBACK_NAME: &str = "LLCCN-Font.7z";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MANIFEST_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(60);
const CHUNK_SIZE: usize = 64 * 1024;

/// The `install_info.json` published next to the patch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallInfo {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub content_link: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub font_link: Option<String>,
    #[serde(default = "default_font_type")]
    pub font_type: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub font_sha256: Option<String>,
}

impl InstallInfo {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let info: InstallInfo = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
            .map_err(|err| FetchError::Corrupt(format!("install info: {err}")))?;
        if info.content_link.trim().is_empty() {
            return Err(FetchError::Corrupt("install info has no content-link".into()));
        }
        Ok(info)
    }

    pub fn font_link(&self) -> Option<&str> {
        self.font_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_content_type() -> String {
    "zip".to_string()
}

fn default_font_type() -> String {
    "7z".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub manifest_url: String,
    pub use_mirror: bool,
    pub mirror_url: Option<String>,
    pub http_proxy: Option<String>,
    pub retry: RetryPolicy,
}

impl FetchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            manifest_url: config.manifest_url.clone(),
            use_mirror: config.use_mirror,
            mirror_url: config.mirror_url.clone(),
            http_proxy: config.http_proxy.clone(),
            retry: RetryPolicy::default(),
        }
    }

    /// URLs to try for one resource: the mirrored one first, the direct one
    /// as the fallback once a retry is needed.
    pub fn sources(&self, raw: &str) -> Vec<String> {
        if !self.use_mirror {
            return vec![raw.to_string()];
        }
        let mirrored = mirror_url(raw, self.mirror_url.as_deref());
        if mirrored == raw {
            vec![raw.to_string()]
        } else {
            vec![mirrored, raw.to_string()]
        }
    }

    fn agent(&self, read_timeout: Duration) -> Result<ureq::Agent, FetchError> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout);
        if let Some(proxy) = self.http_proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = ureq::Proxy::new(proxy)
                .map_err(|err| FetchError::Transport(format!("invalid proxy {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Rewrites `https://host/path` to `<prefix>/host/path`. Without a custom
/// prefix the public GitHub proxy is used.
pub fn mirror_url(raw: &str, custom: Option<&str>) -> String {
    let prefix = custom
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(DEFAULT_MIRROR_URL)
        .trim_end_matches('/');
    let Some((_, rest)) = raw.split_once("://") else {
        return raw.to_string();
    };
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    if rest.is_empty() {
        return raw.to_string();
    }
    format!("{prefix}/{rest}")
}

/// Last path segment of a URL, or `fallback` when there is none.
pub fn file_name_from_url(url: &str, fallback: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, path)| path).unwrap_or(""))
        .unwrap_or(without_query);
    path.rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Runs `op` against `sources`, switching to the fallback source after the
/// first failure. Only timeouts and connection errors are retried.
pub fn with_retries<T>(
    sources: &[String],
    policy: RetryPolicy,
    status: &OperationStatus,
    mut op: impl FnMut(&str) -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        let index = if attempt == 0 { 0 } else { sources.len().saturating_sub(1) };
        let Some(url) = sources.get(index) else {
            return Err(FetchError::Transport("no source URL".into()));
        };
        match op(url) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                attempt += 1;
                tracing::warn!(url = %url, error = %err, attempt, max = attempts, "request failed, retrying");
                thread::sleep(policy.delay);
                if status.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn fetch_install_info(
    settings: &FetchSettings,
    status: &OperationStatus,
) -> Result<InstallInfo, FetchError> {
    status.set_phase(Phase::Fetching);
    let agent = settings.agent(MANIFEST_READ_TIMEOUT)?;
    let sources = settings.sources(&settings.manifest_url);
    let raw = with_retries(&sources, settings.retry, status, |url| {
        tracing::info!(url, "fetching install info");
        let response = agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| map_ureq(url, err))?;
        response.into_string().map_err(|err| map_io(url, err))
    })?;
    let info = InstallInfo::parse(&raw)?;
    tracing::debug!(name = %info.name, content = %info.content_link, font = ?info.font_link(), "install info loaded");
    Ok(info)
}

/// Downloads `url` (with mirror and retries) to `dest`, returning the
/// SHA-256 of the data. The file only appears at `dest` once complete.
pub fn download(
    settings: &FetchSettings,
    url: &str,
    dest: &Path,
    status: &OperationStatus,
    expected_sha256: Option<&str>,
) -> Result<String, FetchError> {
    let agent = settings.agent(DOWNLOAD_READ_TIMEOUT)?;
    let part = part_path(dest);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| io_failure(parent, err))?;
    }
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let digest = with_retries(&settings.sources(url), settings.retry, status, |source| {
        tracing::info!(url = source, dest = %dest.display(), "downloading");
        let response = agent
            .get(source)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| map_ureq(source, err))?;
        let total = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        status.start_download(&name, total);
        let mut file = File::create(&part).map_err(|err| io_failure(&part, err))?;
        let result = copy_with_progress(&mut response.into_reader(), &mut file, status)
            .map_err(|err| match err {
                CopyError::Read(err) => map_io(source, err),
                CopyError::Write(err) => io_failure(&part, err),
                CopyError::Cancelled => FetchError::Cancelled,
            });
        drop(file);
        if result.is_err() {
            let _ = fs::remove_file(&part);
        }
        result
    })?;

    if let Some(expected) = expected_sha256 {
        if !digest.eq_ignore_ascii_case(expected.trim()) {
            let _ = fs::remove_file(&part);
            return Err(FetchError::Corrupt(format!(
                "checksum mismatch for {name}: expected {expected}, got {digest}"
            )));
        }
    }
    fs::rename(&part, dest).map_err(|err| {
        let _ = fs::remove_file(&part);
        io_failure(dest, err)
    })?;
    tracing::info!(dest = %dest.display(), sha256 = %digest, "download complete");
    Ok(digest)
}

/// Fetches the manifest and both archives, then materializes the bundle.
/// Downloaded archives are removed afterwards.
pub fn fetch_bundle(
    settings: &FetchSettings,
    status: &OperationStatus,
    work_dir: &Path,
    version: Option<&str>,
) -> Result<ResourceBundle, PatchError> {
    let info = fetch_install_info(settings, status)?;
    let content_kind = archive_kind(&info.content_type)?;
    let content_path = work_dir.join(file_name_from_url(&info.content_link, CONTENT_FALLBACK_NAME));
    let mut downloaded = vec![content_path.clone()];

    let result = (|| -> Result<ResourceBundle, PatchError> {
        let content_sha = download(
            settings,
            &info.content_link,
            &content_path,
            status,
            info.sha256.as_deref(),
        )?;

        let mut font = None;
        if let Some(link) = info.font_link() {
            let kind = archive_kind(&info.font_type)?;
            let path = work_dir.join(file_name_from_url(link, FONT_FALLBACK_NAME));
            downloaded.push(path.clone());
            let sha = download(settings, link, &path, status, info.font_sha256.as_deref())?;
            font = Some((path, kind, sha));
        }

        let version = match (version, info.version.as_deref()) {
            (Some(version), _) | (None, Some(version)) => version.to_string(),
            (None, None) => derived_version(&content_sha, font.as_ref().map(|(_, _, sha)| sha.as_str())),
        };

        status.set_phase(Phase::Extracting);
        let mut bundle = ResourceBundle::from_archive(&content_path, content_kind, &version, &info.name)?;
        if let Some((path, kind, _)) = &font {
            let fonts = ResourceBundle::from_archive(path, *kind, &version, &info.name)?;
            bundle = bundle.merge(fonts);
        }
        tracing::info!(version = %bundle.version(), files = bundle.entries().len(), "bundle ready");
        Ok(bundle)
    })();

    for path in &downloaded {
        let _ = fs::remove_file(path);
        let _ = fs::remove_file(part_path(path));
    }
    result
}

fn archive_kind(value: &str) -> Result<ArchiveKind, PatchError> {
    ArchiveKind::parse(value)
        .ok_or_else(|| PatchError::InvalidBundle(format!("unsupported archive type {value}")))
}

/// Version label when the manifest carries none: a short digest of the
/// downloaded archives, so unchanged content is detected as up to date.
fn derived_version(content_sha: &str, font_sha: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_sha.as_bytes());
    if let Some(font_sha) = font_sha {
        hasher.update(font_sha.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("sha-{}", &digest[..12])
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[derive(Debug)]
enum CopyError {
    Read(io::Error),
    Write(io::Error),
    Cancelled,
}

fn copy_with_progress(
    reader: &mut impl Read,
    writer: &mut impl Write,
    status: &OperationStatus,
) -> Result<String, CopyError> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if status.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };
        writer.write_all(&buffer[..read]).map_err(CopyError::Write)?;
        hasher.update(&buffer[..read]);
        status.add_bytes(read as u64);
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn map_ureq(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(status, _) => FetchError::HttpStatus {
            status,
            url: url.to_string(),
        },
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                FetchError::Timeout(format!("{url}: {transport}"))
            } else {
                FetchError::Transport(format!("{url}: {transport}"))
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error;
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if is_timeout_kind(io_err.kind()) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn map_io(url: &str, err: io::Error) -> FetchError {
    if is_timeout_kind(err.kind()) {
        FetchError::Timeout(format!("{url}: {err}"))
    } else {
        FetchError::Transport(format!("{url}: {err}"))
    }
}

/// Local disk trouble while downloading; not worth retrying.
fn io_failure(path: &Path, err: io::Error) -> FetchError {
    FetchError::Corrupt(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, io::Cursor};

    fn settings(use_mirror: bool, custom: Option<&str>) -> FetchSettings {
        FetchSettings {
            manifest_url: crate::config::DEFAULT_MANIFEST_URL.to_string(),
            use_mirror,
            mirror_url: custom.map(str::to_string),
            http_proxy: None,
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            },
        }
    }

    #[test]
    fn mirror_rewrites_host_and_path() {
        let raw = "https://raw.githubusercontent.com/EveGlowLuna/LLC-TemporaryReplacer/refs/heads/main/install_info.json";
        assert_eq!(
            mirror_url(raw, None),
            "https://gh-proxy.com/raw.githubusercontent.com/EveGlowLuna/LLC-TemporaryReplacer/refs/heads/main/install_info.json"
        );
        assert_eq!(
            mirror_url("https://github.com/a/b/x.7z?raw=1", Some("https://proxy.example/")),
            "https://proxy.example/github.com/a/b/x.7z"
        );
        assert_eq!(mirror_url("not a url", None), "not a url");
    }

    #[test]
    fn sources_fall_back_to_direct_url() {
        let url = "https://github.com/x/y.zip";
        assert_eq!(settings(false, None).sources(url), vec![url.to_string()]);
        assert_eq!(
            settings(true, Some("https://p.example")).sources(url),
            vec!["https://p.example/github.com/x/y.zip".to_string(), url.to_string()]
        );
    }

    #[test]
    fn install_info_defaults() {
        let info = InstallInfo::parse(
            r#"{"content-link": "https://github.com/x/releases/download/v1/LimbusLocalize_latest.7z", "content-type": "7z", "font-link": ""}"#,
        )
        .unwrap();
        assert_eq!(info.name, DEFAULT_NAME);
        assert_eq!(info.content_type, "7z");
        assert_eq!(info.font_type, "7z");
        assert_eq!(info.font_link(), None);
        assert_eq!(info.version, None);

        let err = InstallInfo::parse(r#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Corrupt(_)));
    }

    #[test]
    fn file_names_come_from_url_path() {
        assert_eq!(
            file_name_from_url("https://host/dl/LLCCN-Font.7z?token=1", FONT_FALLBACK_NAME),
            "LLCCN-Font.7z"
        );
        assert_eq!(
            file_name_from_url("https://host/", CONTENT_FALLBACK_NAME),
            CONTENT_FALLBACK_NAME
        );
        assert_eq!(
            file_name_from_url("https://host", CONTENT_FALLBACK_NAME),
            CONTENT_FALLBACK_NAME
        );
    }

    #[test]
    fn retries_switch_to_fallback_then_give_up() {
        let sources = vec!["https://mirror/a".to_string(), "https://direct/a".to_string()];
        let seen = std::cell::RefCell::new(Vec::new());
        let result: Result<(), _> = with_retries(
            &sources,
            settings(true, None).retry,
            &OperationStatus::new(),
            |url| {
                seen.borrow_mut().push(url.to_string());
                Err(FetchError::Timeout("slow".into()))
            },
        );
        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert_eq!(
            seen.into_inner(),
            vec!["https://mirror/a", "https://direct/a", "https://direct/a"]
        );
    }

    #[test]
    fn status_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retries(
            &["https://x".to_string()],
            settings(false, None).retry,
            &OperationStatus::new(),
            |url| {
                calls.set(calls.get() + 1);
                Err(FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
            },
        );
        assert!(matches!(result, Err(FetchError::HttpStatus { status: 404, .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retry_succeeds_after_transient_error() {
        let calls = Cell::new(0);
        let value = with_retries(
            &["https://x".to_string()],
            settings(false, None).retry,
            &OperationStatus::new(),
            |_| {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    Err(FetchError::Transport("reset".into()))
                } else {
                    Ok(7)
                }
            },
        )
        .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn copy_reports_progress_and_digest() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let status = OperationStatus::new();
        status.start_download("a.zip", Some(data.len() as u64));
        let mut out = Vec::new();
        let digest = copy_with_progress(&mut Cursor::new(&data), &mut out, &status).unwrap();
        assert_eq!(out, data);
        assert_eq!(digest, format!("{:x}", Sha256::digest(&data)));
        assert_eq!(status.snapshot().bytes, (data.len() as u64, data.len() as u64));
    }

    #[test]
    fn copy_stops_when_cancelled() {
        let status = OperationStatus::new();
        status.cancel();
        let mut out = Vec::new();
        let err = copy_with_progress(&mut Cursor::new(vec![1u8; 16]), &mut out, &status).unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
        assert!(out.is_empty());
    }

    #[test]
    fn derived_version_tracks_content() {
        let a = derived_version("aaaa", None);
        assert!(a.starts_with("sha-"));
        assert_eq!(a.len(), 16);
        assert_eq!(a, derived_version("aaaa", None));
        assert_ne!(a, derived_version("aaaa", Some("ffff")));
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/dl/LLCCN-Font.7z")),
            PathBuf::from("/tmp/dl/LLCCN-Font.7z.part")
        );
    }
}
