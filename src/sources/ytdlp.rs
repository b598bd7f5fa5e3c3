use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::{AudioResource, FetchedTrack, Fetcher, ResolvedTrack, Resolver};
use crate::{
    audio::queue::TrackRequest,
    config::Config,
    error::{FetchError, ResolutionError},
};

const FETCH_DIR_PREFIX: &str = "fetch-";

static SPOTIFY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?open\.spotify\.com/(track|album|playlist)/[a-zA-Z0-9]+")
        .expect("spotify link pattern is valid")
});

/// Cliente para resolver y descargar con yt-dlp
pub struct YtDlpClient {
    executable: String,
    cache_dir: PathBuf,
    audio_format: String,
    audio_quality: String,
    max_playlist_size: usize,
    fetch_timeout: Duration,
    // Limitar procesos concurrentes de yt-dlp entre todas las guilds
    rate_limiter: Semaphore,
}

/// Entrada de `--flat-playlist --dump-json`
#[derive(Debug, Deserialize)]
struct FlatEntry {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpClient {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: config.ytdlp_path.clone(),
            cache_dir: config.cache_dir.clone(),
            audio_format: config.audio_format.clone(),
            audio_quality: config.audio_quality.clone(),
            max_playlist_size: config.max_playlist_size,
            fetch_timeout: config.fetch_timeout,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Directorio temporal propio de una descarga dentro de `cache_dir`
    async fn fetch_dir(&self) -> std::io::Result<TempDir> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tempfile::Builder::new()
            .prefix(FETCH_DIR_PREFIX)
            .tempdir_in(&self.cache_dir)
    }

    /// Directorio de descarga que contiene `path`, si lo creó este cliente
    fn owning_fetch_dir<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        let dir = path.parent()?;
        let is_fetch_dir = dir.parent() == Some(self.cache_dir.as_path())
            && dir
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(FETCH_DIR_PREFIX));
        is_fetch_dir.then_some(dir)
    }

    pub fn parse_link(query: &str) -> Option<Url> {
        Url::parse(query)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
    }

    async fn resolve_link(&self, link: &Url) -> Result<Vec<ResolvedTrack>, ResolutionError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolutionError::Backend(e.to_string()))?;

        info!("📋 Resolviendo enlace: {}", link);

        let output = Command::new(&self.executable)
            .args([
                "--flat-playlist",
                "--dump-json",
                "--no-warnings",
                "--playlist-end",
                self.max_playlist_size.to_string().as_str(),
            ])
            .arg(link.as_str())
            .output()
            .await
            .map_err(|e| ResolutionError::Backend(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolutionError::Backend(last_line(&stderr).to_string()));
        }

        let tracks = parse_flat_entries(&String::from_utf8_lossy(&output.stdout));
        if tracks.is_empty() {
            return Err(ResolutionError::NoResults(link.to_string()));
        }

        debug!("📋 {} entradas resueltas desde {}", tracks.len(), link);
        Ok(tracks)
    }

    fn download_target(query: &str) -> String {
        if Self::parse_link(query).is_some() {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }
}

#[async_trait]
impl Resolver for YtDlpClient {
    async fn resolve(&self, query: &str) -> Result<Vec<ResolvedTrack>, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::Empty);
        }

        if query.contains("open.spotify.com") {
            if !SPOTIFY_LINK.is_match(query) {
                return Err(ResolutionError::InvalidLink(query.to_string()));
            }
            return Err(ResolutionError::Unsupported(query.to_string()));
        }

        match Self::parse_link(query) {
            Some(link) => self.resolve_link(&link).await,
            // Las búsquedas se resuelven al descargar
            None => Ok(vec![ResolvedTrack::query(query)]),
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpClient {
    async fn fetch(&self, track: &TrackRequest) -> Result<FetchedTrack, FetchError> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| FetchError::Download {
            query: track.query.clone(),
            reason: e.to_string(),
        })?;

        info!("⬇️ Descargando: {}", track.display());

        // Cada descarga usa su propio directorio; si falla se borra al soltarlo
        let dir = self.fetch_dir().await?;
        let template = dir.path().join("%(id)s.%(ext)s");
        let mut command = Command::new(&self.executable);
        command
            .args([
                "--no-playlist",
                "--no-simulate",
                "--no-warnings",
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                self.audio_format.as_str(),
                "--audio-quality",
                self.audio_quality.as_str(),
                "--print",
                "title",
                "--print",
                "after_move:filepath",
                "-o",
            ])
            .arg(&template)
            .arg(Self::download_target(&track.query))
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.fetch_timeout, command.output())
            .await
            .map_err(|_| FetchError::Timeout {
                query: track.query.clone(),
                timeout: self.fetch_timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Download {
                query: track.query.clone(),
                reason: last_line(&stderr).to_string(),
            });
        }

        let (title, path) = parse_fetch_output(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| FetchError::MissingOutput(track.query.clone()))?;

        if !tokio::fs::try_exists(&path).await? {
            return Err(FetchError::MissingOutput(track.query.clone()));
        }

        let _ = dir.keep();
        info!("✅ Descargado '{}' en {}", title, path.display());
        Ok(FetchedTrack {
            resource: AudioResource::File(path),
            title,
        })
    }

    async fn release(&self, resource: &AudioResource) {
        let AudioResource::File(path) = resource else {
            return;
        };

        match self.owning_fetch_dir(path) {
            Some(dir) => remove_download_dir(dir).await,
            None => remove_download(path).await,
        }
    }
}

async fn remove_download(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🧹 Eliminado {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("No se pudo eliminar {}: {}", path.display(), e),
    }
}

async fn remove_download_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("🧹 Eliminado {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("No se pudo eliminar {}: {}", dir.display(), e),
    }
}

/// Extrae título (primera línea) y ruta final (última línea) de `--print`
fn parse_fetch_output(stdout: &str) -> Option<(String, PathBuf)> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next()?.to_string();
    let path = lines.last()?;
    Some((title, PathBuf::from(path)))
}

fn parse_flat_entries(stdout: &str) -> Vec<ResolvedTrack> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<FlatEntry>(line).ok())
        .filter_map(|entry| {
            let query = entry.webpage_url.or(entry.url)?;
            Some(match entry.title {
                Some(title) => ResolvedTrack::labelled(query, title),
                None => ResolvedTrack::query(query),
            })
        })
        .collect()
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client() -> YtDlpClient {
        YtDlpClient::new(&Config::default())
    }

    #[tokio::test]
    async fn test_plain_query_resolves_to_itself() {
        let tracks = client().resolve("  never gonna give you up ").await.unwrap();
        assert_eq!(tracks, vec![ResolvedTrack::query("never gonna give you up")]);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let err = client().resolve("   ").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Empty));
    }

    #[tokio::test]
    async fn test_spotify_links() {
        let err = client()
            .resolve("https://open.spotify.com/nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidLink(_)));

        let err = client()
            .resolve("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Unsupported(_)));
    }

    #[test]
    fn test_link_detection() {
        assert!(YtDlpClient::parse_link("https://youtu.be/dQw4w9WgXcQ").is_some());
        assert!(YtDlpClient::parse_link("http://example.com/a.mp3").is_some());
        assert!(YtDlpClient::parse_link("artist - song").is_none());
        assert!(YtDlpClient::parse_link("file:///etc/passwd").is_none());
    }

    #[test]
    fn test_download_target() {
        assert_eq!(YtDlpClient::download_target("lofi beats"), "ytsearch1:lofi beats");
        assert_eq!(
            YtDlpClient::download_target("https://youtu.be/x"),
            "https://youtu.be/x"
        );
    }

    #[test]
    fn test_parse_fetch_output() {
        let stdout = "Song Title\n\n/app/cache/abc123.opus\n";
        assert_eq!(
            parse_fetch_output(stdout),
            Some(("Song Title".to_string(), PathBuf::from("/app/cache/abc123.opus")))
        );
        assert_eq!(parse_fetch_output("Only a title\n"), None);
        assert_eq!(parse_fetch_output(""), None);
    }

    #[test]
    fn test_parse_flat_entries() {
        let stdout = concat!(
            r#"{"id":"a","title":"First","url":"https://www.youtube.com/watch?v=a"}"#,
            "\n",
            "not json\n",
            r#"{"id":"b","webpage_url":"https://www.youtube.com/watch?v=b"}"#,
            "\n",
            r#"{"id":"c","title":"No link"}"#,
            "\n",
        );

        assert_eq!(
            parse_flat_entries(stdout),
            vec![
                ResolvedTrack::labelled("https://www.youtube.com/watch?v=a", "First"),
                ResolvedTrack::query("https://www.youtube.com/watch?v=b"),
            ]
        );
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("WARNING: x\nERROR: boom\n\n"), "ERROR: boom");
        assert_eq!(last_line(""), "unknown error");
    }

    fn client_in(cache_dir: &Path) -> YtDlpClient {
        YtDlpClient::new(&Config {
            cache_dir: cache_dir.to_path_buf(),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_each_fetch_gets_its_own_directory() {
        let cache = tempfile::tempdir().unwrap();
        let client = client_in(cache.path());

        let first = client.fetch_dir().await.unwrap();
        let second = client.fetch_dir().await.unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(first.path().parent(), Some(cache.path()));
        assert_eq!(client.owning_fetch_dir(&first.path().join("a.opus")), Some(first.path()));
    }

    #[tokio::test]
    async fn test_release_leaves_other_fetches_alone() {
        let cache = tempfile::tempdir().unwrap();
        let client = client_in(cache.path());

        // Dos guilds descargan el mismo video
        let mine = client.fetch_dir().await.unwrap().keep();
        let theirs = client.fetch_dir().await.unwrap().keep();
        let my_file = mine.join("dQw4w9WgXcQ.opus");
        let their_file = theirs.join("dQw4w9WgXcQ.opus");
        tokio::fs::write(&my_file, b"audio").await.unwrap();
        tokio::fs::write(&their_file, b"audio").await.unwrap();

        client.release(&AudioResource::File(my_file)).await;

        assert!(!mine.exists());
        assert!(their_file.exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_cleans_its_directory() {
        let cache = tempfile::tempdir().unwrap();
        let client = YtDlpClient::new(&Config {
            cache_dir: cache.path().to_path_buf(),
            ytdlp_path: "/nonexistent/yt-dlp".into(),
            ..Config::default()
        });

        let result = client.fetch(&TrackRequest::new("song", serenity::model::id::UserId::new(1))).await;

        assert!(result.is_err());
        let mut entries = tokio::fs::read_dir(cache.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_removes_downloaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.opus");
        tokio::fs::write(&path, b"audio").await.unwrap();

        let client = client();
        client.release(&AudioResource::File(path.clone())).await;
        assert!(!path.exists());

        // Segunda liberación no falla
        client.release(&AudioResource::File(path)).await;
    }
}
