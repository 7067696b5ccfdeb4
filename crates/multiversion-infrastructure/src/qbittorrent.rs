// SPDX-License-Identifier: GPL-3.0-or-later
use async_trait::async_trait;
use multiversion_application::{DownloadClientError, DownloadService};
use multiversion_config::DownloadClientConfig;
use multiversion_domain::DownloadOrder;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Direct downloads through the qBittorrent Web API.
pub struct QBittorrentClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    category: Option<String>,
    tags: Vec<String>,
}

impl QBittorrentClient {
    pub fn new(base_url: String, username: Option<String>, password: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, username, password)
    }

    pub fn with_client(
        client: Client,
        base_url: String,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            category: None,
            tags: Vec::new(),
        }
    }

    /// `None` when no base url is configured.
    pub fn from_config(client: Client, config: &DownloadClientConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        Some(
            Self::with_client(client, base_url, config.username.clone(), config.password.clone())
                .with_category(config.category.clone())
                .with_tags(config.tags.clone()),
        )
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, DownloadClientError> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|err| DownloadClientError::InvalidBaseUrl(err.to_string()))
    }

    /// Log in when credentials are configured and return the session cookie.
    async fn authenticate_if_configured(&self) -> Result<Option<String>, DownloadClientError> {
        let (Some(username), Some(password)) = (self.username.as_deref(), self.password.as_deref())
        else {
            return Ok(None);
        };

        let url = self.endpoint("/api/v2/auth/login")?;
        let response = self
            .client
            .post(url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| DownloadClientError::Request(e.to_string()))?;

        let status = response.status();
        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.trim_start().starts_with("SID="))
            .map(|pair| pair.trim().to_string());
        let body = response
            .text()
            .await
            .map_err(|e| DownloadClientError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim() != "Ok." {
            return Err(DownloadClientError::Authentication);
        }

        Ok(cookie)
    }

    fn torrent_source(order: &DownloadOrder) -> Result<String, DownloadClientError> {
        if let Some(url) = order
            .candidate
            .download_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            return Ok(url.to_string());
        }
        order
            .candidate
            .content_hash()
            .map(|hash| format!("magnet:?xt=urn:btih:{hash}"))
            .ok_or_else(|| DownloadClientError::MissingSource(order.candidate.title.clone()))
    }
}

#[async_trait]
impl DownloadService for QBittorrentClient {
    async fn download_single(
        &self,
        order: &DownloadOrder,
    ) -> Result<Option<String>, DownloadClientError> {
        let source = Self::torrent_source(order)?;
        let session = self.authenticate_if_configured().await?;

        let mut form: Vec<(&str, String)> = vec![("urls", source)];
        if let Some(category) = &self.category {
            form.push(("category", category.clone()));
        }
        if !self.tags.is_empty() {
            form.push(("tags", self.tags.join(",")));
        }

        debug!(
            target: "download_client",
            media = %order.media,
            rule = %order.rule_group,
            candidate = %order.candidate.title,
            "adding torrent"
        );

        let url = self.endpoint("/api/v2/torrents/add")?;
        let mut request = self.client.post(url).form(&form);
        if let Some(cookie) = session {
            request = request.header(COOKIE, cookie);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadClientError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DownloadClientError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(DownloadClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim() == "Fails." {
            warn!(
                target: "download_client",
                media = %order.media,
                candidate = %order.candidate.title,
                "qbittorrent refused torrent"
            );
            return Ok(None);
        }

        let download_id = order
            .candidate
            .content_hash()
            .map(str::to_lowercase)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(
            target: "download_client",
            media = %order.media,
            rule = %order.rule_group,
            %download_id,
            "torrent added"
        );
        Ok(Some(download_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiversion_domain::{Attribution, Candidate, MediaIdentity};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn order(candidate: Candidate) -> DownloadOrder {
        DownloadOrder {
            candidate,
            media: MediaIdentity::tmdb(100),
            title: "Arrival (2016)".to_string(),
            rule_group: "4K".to_string(),
            attribution: Attribution::default(),
        }
    }

    #[tokio::test]
    async fn download_posts_url_category_and_tags() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(body_string_contains("urls=https%3A%2F%2Ftracker.example%2Fdl%2F1"))
            .and(body_string_contains("category=movies"))
            .and(body_string_contains("tags=multiversion"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(server.uri(), None, None)
            .with_category(Some("movies".to_string()))
            .with_tags(vec!["multiversion".to_string()]);
        let candidate = Candidate::new("Arrival 2016 2160p")
            .with_hash("ABC123")
            .with_download_url("https://tracker.example/dl/1");

        let id = client.download_single(&order(candidate)).await.expect("download");

        assert_eq!(id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn hash_only_candidate_becomes_magnet() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(body_string_contains("urls=magnet%3A%3Fxt%3Durn%3Abtih%3Aabc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(server.uri(), None, None);
        let id = client
            .download_single(&order(Candidate::new("Arrival").with_hash("abc123")))
            .await
            .expect("download");

        assert_eq!(id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn fails_body_is_a_soft_refusal() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(server.uri(), None, None);
        let id = client
            .download_single(&order(Candidate::new("Arrival").with_hash("abc123")))
            .await
            .expect("no transport error");

        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(server.uri(), None, None);
        let err = client
            .download_single(&order(Candidate::new("Arrival").with_hash("abc123")))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadClientError::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn login_cookie_is_forwarded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "SID=s3cr3t; HttpOnly; path=/")
                    .set_body_string("Ok."),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .and(header("cookie", "SID=s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(
            server.uri(),
            Some("admin".to_string()),
            Some("adminadmin".to_string()),
        );
        let id = client
            .download_single(&order(Candidate::new("Arrival").with_hash("abc123")))
            .await
            .expect("download");

        assert!(id.is_some());
    }

    #[tokio::test]
    async fn rejected_login_is_an_authentication_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let client = QBittorrentClient::new(
            server.uri(),
            Some("admin".to_string()),
            Some("wrong".to_string()),
        );
        let err = client
            .download_single(&order(Candidate::new("Arrival").with_hash("abc123")))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadClientError::Authentication));
    }

    #[tokio::test]
    async fn candidate_without_source_is_rejected_before_any_request() {
        let client = QBittorrentClient::new("http://127.0.0.1:9".to_string(), None, None);
        let err = client
            .download_single(&order(Candidate::new("Arrival")))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadClientError::MissingSource(_)));
    }

    #[test]
    fn from_config_requires_base_url() {
        let mut config = DownloadClientConfig::default();
        assert!(QBittorrentClient::from_config(Client::new(), &config).is_none());

        config.base_url = Some("http://localhost:8080/".to_string());
        let client = QBittorrentClient::from_config(Client::new(), &config).expect("configured");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.tags, vec!["multiversion"]);
    }
}
