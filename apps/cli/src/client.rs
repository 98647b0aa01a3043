//! HTTP client for a running `dlrelay serve`

use crate::server::{PASSWORD_HEADER, USER_HEADER};
use anyhow::{bail, Context, Result};
use dlrelay_types::{Credentials, HttpAuth, ProgressSnapshot, SourceKind, SubmitResponse};
use reqwest::{Client, Response};
use std::time::Duration;

pub struct RelayClient {
    http: Client,
    base: String,
    credentials: Credentials,
}

impl RelayClient {
    pub fn new(base: &str, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("dlrelay-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    /// Submit a download; an `ERROR` reply comes back as `Ok`
    pub async fn submit(
        &self,
        owner: &str,
        uri: &str,
        kind: SourceKind,
        auth: Option<&HttpAuth>,
    ) -> Result<SubmitResponse> {
        let url = match (kind, auth) {
            (SourceKind::Torrent, _) => self.url(&["add", "torrent", owner, uri]),
            (SourceKind::Http, Some(auth)) => {
                self.url(&["add", "uri", owner, &auth.username, &auth.password, uri])
            }
            (SourceKind::Http, None) => self.url(&["add", "uri", owner, uri]),
            (SourceKind::Video, _) => self.url(&["add", "video", owner, uri]),
        };

        let response = self
            .http
            .post(&url)
            .header(USER_HEADER, &self.credentials.username)
            .header(PASSWORD_HEADER, &self.credentials.password)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        response
            .json()
            .await
            .context("unexpected reply to submission")
    }

    pub async fn status(&self, owner: &str) -> Result<ProgressSnapshot> {
        let response = self
            .http
            .get(self.url(&["status", owner]))
            .header(USER_HEADER, &self.credentials.username)
            .header(PASSWORD_HEADER, &self.credentials.password)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;

        if !response.status().is_success() {
            bail!("{}", error_message(response).await);
        }
        response.json().await.context("unexpected status reply")
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<SubmitResponse>().await {
        Ok(SubmitResponse::Error { message }) => message,
        _ => format!("server replied {}", status),
    }
}
