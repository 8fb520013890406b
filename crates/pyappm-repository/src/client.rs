use std::fs::{self, File};
use std::path::{Path, PathBuf};

use pyappm_core::{Error, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{ApplicationListing, Credentials, RepositoryEntry};

const ZIP_CONTENT_TYPE: &str = "application/zip";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Plain(Vec<ApplicationListing>),
    Wrapped { apps: Vec<ApplicationListing> },
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(alias = "token")]
    access_token: String,
}

/// HTTP client bound to one repository.
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    entry: RepositoryEntry,
    http: Client,
}

impl RepositoryClient {
    pub fn new(entry: RepositoryEntry) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pyappm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::RepositoryUnreachable {
                url: entry.url.clone(),
                message: format!("failed building HTTP client: {err}"),
            })?;
        Ok(Self { entry, http })
    }

    pub fn entry(&self) -> &RepositoryEntry {
        &self.entry
    }

    /// Every application the repository offers with its latest version.
    pub fn list_applications(&self) -> Result<Vec<ApplicationListing>> {
        let url = self.endpoint(&["apps", "list"])?;
        let response = self.send(&url, self.http.get(&url))?;
        let response = self.expect_success(&url, response)?;
        parse_listing(&url, &read_body(&url, response)?)
    }

    /// Listings for one application; an empty answer is reported as not found.
    pub fn find_application(&self, name: &str) -> Result<Vec<ApplicationListing>> {
        let url = self.endpoint(&["apps", "find", name])?;
        let response = self.send(&url, self.http.get(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(name, None));
        }
        let response = self.expect_success(&url, response)?;
        let listings = parse_listing(&url, &read_body(&url, response)?)?;
        if listings.is_empty() {
            return Err(not_found(name, None));
        }
        Ok(listings)
    }

    /// Downloads the application archive to `dest`; `None` asks for the latest version.
    ///
    /// The body is streamed to `<dest>.part` and renamed once complete.
    pub fn fetch(&self, name: &str, version: Option<&str>, dest: &Path) -> Result<u64> {
        let url = self.endpoint(&["apps", name])?;
        let mut request = self.http.get(&url).header(ACCEPT, ZIP_CONTENT_TYPE);
        if let Some(version) = version {
            request = request.query(&[("version", version)]);
        }

        let response = self.send(&url, request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found(name, version));
        }
        let mut response = self.expect_success(&url, response)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }
        let part_path = part_path(dest);
        let written = (|| -> Result<u64> {
            let mut file = File::create(&part_path).map_err(|err| Error::io(&part_path, err))?;
            let written =
                response
                    .copy_to(&mut file)
                    .map_err(|err| Error::RepositoryUnreachable {
                        url: url.clone(),
                        message: format!("failed reading archive body: {err}"),
                    })?;
            file.sync_all().map_err(|err| Error::io(&part_path, err))?;
            Ok(written)
        })();
        let written = match written {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&part_path);
                return Err(err);
            }
        };
        fs::rename(&part_path, dest).map_err(|err| {
            let _ = fs::remove_file(&part_path);
            Error::io(dest, err)
        })?;

        info!(
            repository = %self.entry.name,
            application = name,
            bytes = written,
            path = %dest.display(),
            "fetched archive"
        );
        Ok(written)
    }

    /// Exchanges a username and password for a session token.
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let url = self.endpoint(&["login"])?;
        let body = serde_json::json!({ "username": username, "password": password });
        let request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body.to_string());

        let response = self.send(&url, request)?;
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::Authentication {
                url,
                message: format!("credentials rejected (status {})", status.as_u16()),
            });
        }
        let response = self.expect_success(&url, response)?;
        let bytes = read_body(&url, response)?;
        let token: TokenBody =
            serde_json::from_slice(&bytes).map_err(|err| Error::RepositoryProtocol {
                url: url.clone(),
                message: format!("invalid login response: {err}"),
            })?;
        if token.access_token.is_empty() {
            return Err(Error::Authentication {
                url,
                message: "server returned an empty token".to_string(),
            });
        }
        Ok(token.access_token)
    }

    /// Authenticates and posts the archive at `archive_path`.
    pub fn upload(&self, archive_path: &Path, credentials: &Credentials) -> Result<()> {
        let token = match credentials {
            Credentials::Token(token) => token.clone(),
            Credentials::Password { username, password } => self.login(username, password)?,
        };
        let archive = fs::read(archive_path).map_err(|err| Error::io(archive_path, err))?;

        let url = self.endpoint(&["apps", "upload"])?;
        let request = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, ZIP_CONTENT_TYPE)
            .body(archive);
        let response = self.send(&url, request)?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::Authentication {
                url,
                message: format!("upload not authorised (status {})", status.as_u16()),
            });
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(Error::UploadRejected {
                url,
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        info!(
            repository = %self.entry.name,
            archive = %archive_path.display(),
            "uploaded archive"
        );
        Ok(())
    }

    /// Repository URL with `segments` appended, each percent-encoded as one path segment.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<String> {
        let invalid = |message: String| Error::InvalidRepository { message };
        let mut url = Url::parse(&self.entry.url)
            .map_err(|err| invalid(format!("invalid url '{}': {err}", self.entry.url)))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("url cannot take a path: {}", self.entry.url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        debug!(repository = %self.entry.name, url, "sending request");
        request.send().map_err(|err| Error::RepositoryUnreachable {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    fn expect_success(&self, url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(Error::RepositoryProtocol {
            url: url.to_string(),
            message: format!("status {}: {}", status.as_u16(), body.trim()),
        })
    }
}

fn read_body(url: &str, response: Response) -> Result<Vec<u8>> {
    response
        .bytes()
        .map(|bytes| bytes.to_vec())
        .map_err(|err| Error::RepositoryUnreachable {
            url: url.to_string(),
            message: format!("failed reading response body: {err}"),
        })
}

pub(crate) fn parse_listing(url: &str, body: &[u8]) -> Result<Vec<ApplicationListing>> {
    let listing: ListingBody =
        serde_json::from_slice(body).map_err(|err| Error::RepositoryProtocol {
            url: url.to_string(),
            message: format!("invalid application listing: {err}"),
        })?;
    let applications = match listing {
        ListingBody::Plain(applications) | ListingBody::Wrapped { apps: applications } => {
            applications
        }
    };

    if let Some(invalid) = applications
        .iter()
        .find(|app| app.name.trim().is_empty() || app.version.trim().is_empty())
    {
        return Err(Error::RepositoryProtocol {
            url: url.to_string(),
            message: format!("listing entry without name or version: {invalid:?}"),
        });
    }
    Ok(applications)
}

fn not_found(name: &str, version: Option<&str>) -> Error {
    Error::ApplicationNotFound {
        name: name.to_string(),
        version: version.map(str::to_string),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
