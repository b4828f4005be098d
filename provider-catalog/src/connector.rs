//! Catalog server connector
//!
//! Implements `SongCatalog` against the DJ USB server API and exposes the
//! token and upload endpoints used by the upload path.

use async_trait::async_trait;
use bridge_traits::catalog::{is_safe_filename, CatalogError, RemoteSong, SongCatalog, SongStream};
use bridge_traits::http::{HttpClient, HttpRequest};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{auth_status_error, response_detail, unreachable, Result};
use crate::types::{
    AccessToken, SignupRequest, SongsResponse, TokenResponse, UploadReceipt, WireSong,
};

/// Hosted catalog server used when none is configured.
pub const DEFAULT_SERVER_URL: &str = "https://dj-usb-server-usb-mp3-app.onrender.com";

/// Songs a free account may hold before uploads answer `402`.
pub const FREE_TIER_LIMIT: u32 = 25;

const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for the catalog server
///
/// # Example
///
/// ```ignore
/// use provider_catalog::CatalogClient;
/// use bridge_traits::catalog::SongCatalog;
///
/// let client = CatalogClient::new(http_client, "http://localhost:8000");
/// let songs = client.fetch_catalog().await?;
/// ```
pub struct CatalogClient {
    http_client: Arc<dyn HttpClient>,
    server_url: String,
    catalog_timeout: Duration,
    upload_timeout: Duration,
}

impl CatalogClient {
    /// Create a client for `server_url`. A trailing `/` is ignored.
    pub fn new(http_client: Arc<dyn HttpClient>, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            server_url,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    /// Bound for listing, auth calls and download response headers.
    pub fn with_catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Validate one listed song and convert it to the shared model.
    fn convert_song(index: usize, song: WireSong) -> Result<RemoteSong> {
        let filename = song.filename.filter(|f| !f.is_empty()).ok_or_else(|| {
            CatalogError::Protocol(format!("song #{} has no filename", index))
        })?;
        let url = song.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            CatalogError::Protocol(format!("song '{}' has no url", filename))
        })?;

        Ok(RemoteSong {
            filename,
            url,
            size: song.size,
            id: song.id,
            title: song.title,
            artist: song.artist,
            album: song.album,
            duration: song.duration,
        })
    }

    async fn token_request(&self, request: HttpRequest) -> Result<AccessToken> {
        let response = self
            .http_client
            .execute(request.timeout(self.catalog_timeout))
            .await
            .map_err(unreachable)?;

        if !response.is_success() {
            warn!(status = response.status, "Token request rejected");
            return Err(auth_status_error(&response, FREE_TIER_LIMIT));
        }

        let body: TokenResponse = response
            .json()
            .map_err(|e| CatalogError::Protocol(format!("invalid token response: {}", e)))?;
        Ok(AccessToken::new(body.access_token))
    }

    /// Obtain an access token from `POST /auth/token`.
    #[instrument(skip(self), fields(server = %self.server_url))]
    pub async fn request_token(&self) -> Result<AccessToken> {
        let token = self
            .token_request(HttpRequest::post(self.endpoint("/auth/token")))
            .await?;
        debug!("Obtained access token");
        Ok(token)
    }

    /// Log in with email and password (`POST /auth/login`, form body).
    #[instrument(skip(self, password), fields(server = %self.server_url))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AccessToken> {
        let form = format!(
            "username={}&password={}",
            urlencoding::encode(email),
            urlencoding::encode(password)
        );
        self.token_request(HttpRequest::post(self.endpoint("/auth/login")).form_encoded(form))
            .await
    }

    /// Create an account (`POST /auth/signup`, JSON body).
    #[instrument(skip(self, password), fields(server = %self.server_url))]
    pub async fn signup(&self, email: &str, password: &str, name: &str) -> Result<AccessToken> {
        let request = HttpRequest::post(self.endpoint("/auth/signup")).json(&SignupRequest {
            email,
            password,
            name,
        })?;
        self.token_request(request).await
    }

    /// Upload one MP3 (`POST /upload`, multipart field `file`).
    ///
    /// # Errors
    ///
    /// - [`CatalogError::InvalidUpload`] for non-`.mp3` names or empty files,
    ///   before any request is made
    /// - [`CatalogError::UploadLimitReached`] when the server answers `402`
    /// - [`CatalogError::Unauthorized`] on `401`/`403`
    #[instrument(skip(self, data, token), fields(server = %self.server_url, size = data.len()))]
    pub async fn upload(
        &self,
        filename: &str,
        data: Bytes,
        token: &AccessToken,
    ) -> Result<UploadReceipt> {
        if !is_safe_filename(filename) || !filename.to_ascii_lowercase().ends_with(".mp3") {
            return Err(CatalogError::InvalidUpload(format!(
                "only .mp3 files can be uploaded: {}",
                filename
            )));
        }
        if data.is_empty() {
            return Err(CatalogError::InvalidUpload(format!("{} is empty", filename)));
        }

        let boundary = format!("dj-usb-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, filename, &data);

        let request = HttpRequest::post(self.endpoint("/upload"))
            .bearer_token(token.expose())
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(body)
            .timeout(self.upload_timeout);

        let response = self.http_client.execute(request).await.map_err(unreachable)?;
        if !response.is_success() {
            warn!(status = response.status, filename, "Upload rejected");
            return Err(auth_status_error(&response, FREE_TIER_LIMIT));
        }

        let mut receipt: UploadReceipt = if response.body.is_empty() {
            UploadReceipt::default()
        } else {
            response.json().unwrap_or_default()
        };
        receipt.filename.get_or_insert_with(|| filename.to_string());

        info!(filename, song_count = ?receipt.song_count, "Uploaded song");
        Ok(receipt)
    }
}

#[async_trait]
impl SongCatalog for CatalogClient {
    #[instrument(skip(self), fields(server = %self.server_url))]
    async fn fetch_catalog(&self) -> Result<Vec<RemoteSong>> {
        let request = HttpRequest::get(self.endpoint("/songs"))
            .header("Accept", "application/json")
            .timeout(self.catalog_timeout);

        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(error = %e, "Catalog unreachable");
            unreachable(e)
        })?;

        if !response.is_success() {
            return Err(CatalogError::Protocol(response_detail(&response)));
        }

        let listing: SongsResponse = response
            .json()
            .map_err(|e| CatalogError::Protocol(format!("invalid song listing: {}", e)))?;

        let songs = listing
            .songs
            .into_iter()
            .enumerate()
            .map(|(index, song)| Self::convert_song(index, song))
            .collect::<Result<Vec<_>>>()?;

        info!(count = songs.len(), "Fetched catalog");
        Ok(songs)
    }

    #[instrument(skip(self, song), fields(filename = %song.filename))]
    async fn fetch_bytes(&self, song: &RemoteSong) -> Result<SongStream> {
        let url = resolve_song_url(&self.server_url, song);
        debug!(%url, "Opening song stream");

        let request = HttpRequest::get(url).timeout(self.catalog_timeout);
        let stream = self
            .http_client
            .download_stream(request)
            .await
            .map_err(|e| CatalogError::DownloadFailed {
                filename: song.filename.clone(),
                reason: e.to_string(),
            })?;

        if !stream.is_success() {
            return Err(CatalogError::DownloadFailed {
                filename: song.filename.clone(),
                reason: format!("HTTP {}", stream.status),
            });
        }

        Ok(SongStream {
            content_length: stream.content_length,
            reader: stream.reader,
        })
    }
}

/// URL to fetch a song's bytes from.
///
/// The listed URL is used when it is absolute and routable. Relative URLs and
/// URLs advertising the unspecified host (`0.0.0.0`, `[::]`) fall back to
/// `{server}/songs/{filename}`.
pub fn resolve_song_url(server_url: &str, song: &RemoteSong) -> String {
    if is_routable_absolute(&song.url) {
        return song.url.clone();
    }
    format!(
        "{}/songs/{}",
        server_url.trim_end_matches('/'),
        urlencoding::encode(&song.filename)
    )
}

fn is_routable_absolute(url: &str) -> bool {
    let Some((scheme, rest)) = url.split_once("://") else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return false;
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = if host_port.starts_with('[') {
        host_port.split(']').next().unwrap_or_default().trim_start_matches('[')
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    !host.is_empty() && host != "0.0.0.0" && host != "::"
}

fn multipart_body(boundary: &str, filename: &str, data: &[u8]) -> Bytes {
    let quoted = filename.replace('"', "%22");
    let mut body = BytesMut::with_capacity(data.len() + 256);
    body.put_slice(format!("--{}\r\n", boundary).as_bytes());
    body.put_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            quoted
        )
        .as_bytes(),
    );
    body.put_slice(b"Content-Type: audio/mpeg\r\n\r\n");
    body.put_slice(data);
    body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body.freeze()
}
