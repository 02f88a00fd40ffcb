//! Google API clients built per account
//!
//! A [`GoogleServices`] bundle holds one [`ApiClient`] per supported Google
//! API, all sharing the account's [`TokenSource`]. Clients only know where
//! their API lives and how to send an authorized request.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use oauth::{Account, Authorization, ServiceFactory, TokenSource};
use reqwest::{Method, RequestBuilder, Url};
use tracing::debug;

/// Google APIs a bundle carries a client for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoogleApi {
    Drive,
    Gmail,
    Calendar,
    Sheets,
    People,
    Docs,
    Tasks,
    Activity,
    Keep,
}

impl GoogleApi {
    pub const ALL: [GoogleApi; 9] = [
        Self::Drive,
        Self::Gmail,
        Self::Calendar,
        Self::Sheets,
        Self::People,
        Self::Docs,
        Self::Tasks,
        Self::Activity,
        Self::Keep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Gmail => "gmail",
            Self::Calendar => "calendar",
            Self::Sheets => "sheets",
            Self::People => "people",
            Self::Docs => "docs",
            Self::Tasks => "tasks",
            Self::Activity => "activity",
            Self::Keep => "keep",
        }
    }

    /// Production endpoint, always ending in `/`
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Drive => "https://www.googleapis.com/drive/v3/",
            Self::Gmail => "https://gmail.googleapis.com/gmail/v1/",
            Self::Calendar => "https://www.googleapis.com/calendar/v3/",
            Self::Sheets => "https://sheets.googleapis.com/v4/",
            Self::People => "https://people.googleapis.com/v1/",
            Self::Docs => "https://docs.googleapis.com/v1/",
            Self::Tasks => "https://tasks.googleapis.com/tasks/v1/",
            Self::Activity => "https://driveactivity.googleapis.com/v2/",
            Self::Keep => "https://keep.googleapis.com/v1/",
        }
    }
}

impl fmt::Display for GoogleApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoogleApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|api| api.as_str() == s)
            .ok_or_else(|| format!("unknown service: {s}"))
    }
}

/// An authorized client for one Google API
#[derive(Debug, Clone)]
pub struct ApiClient {
    api: GoogleApi,
    base_url: Url,
    http: reqwest::Client,
    tokens: TokenSource,
}

impl ApiClient {
    pub fn api(&self) -> GoogleApi {
        self.api
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL.
    ///
    /// The result must stay under the base URL: absolute URLs, other hosts,
    /// and `..` segments that climb out of the API root are rejected.
    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        if url.scheme() != self.base_url.scheme()
            || url.host_str() != self.base_url.host_str()
            || url.port_or_known_default() != self.base_url.port_or_known_default()
            || !url.path().starts_with(self.base_url.path())
        {
            anyhow::bail!("{}: path {path:?} resolves outside {}", self.api, self.base_url);
        }
        Ok(url)
    }

    /// Starts a request carrying a fresh bearer token
    pub async fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let url = self.url(path)?;
        let access_token = self.tokens.access_token().await?;
        debug!("{} {} via {}", method, url, self.api);
        Ok(self.http.request(method, url).bearer_auth(access_token))
    }
}

/// Every API client for one account
#[derive(Debug)]
pub struct GoogleServices {
    account: Option<Account>,
    scopes: Vec<String>,
    pub drive: ApiClient,
    pub gmail: ApiClient,
    pub calendar: ApiClient,
    pub sheets: ApiClient,
    pub people: ApiClient,
    pub docs: ApiClient,
    pub tasks: ApiClient,
    pub activity: ApiClient,
    pub keep: ApiClient,
}

impl GoogleServices {
    /// The account this bundle was built for; `None` in legacy mode
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn client(&self, api: GoogleApi) -> &ApiClient {
        match api {
            GoogleApi::Drive => &self.drive,
            GoogleApi::Gmail => &self.gmail,
            GoogleApi::Calendar => &self.calendar,
            GoogleApi::Sheets => &self.sheets,
            GoogleApi::People => &self.people,
            GoogleApi::Docs => &self.docs,
            GoogleApi::Tasks => &self.tasks,
            GoogleApi::Activity => &self.activity,
            GoogleApi::Keep => &self.keep,
        }
    }
}

/// Builds [`GoogleServices`] bundles
#[derive(Debug, Clone, Default)]
pub struct GoogleServiceFactory {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl GoogleServiceFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: None,
        }
    }

    /// Sends every API to `{base_url}/{service}/` instead of Google,
    /// for emulators and tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn base_url_for(&self, api: GoogleApi) -> anyhow::Result<Url> {
        let raw = match &self.base_url {
            Some(base) => format!("{}/{}/", base.trim_end_matches('/'), api),
            None => api.default_base_url().to_string(),
        };
        Url::parse(&raw).map_err(|e| anyhow::anyhow!("{api}: invalid base URL {raw:?}: {e}"))
    }

    fn client(&self, api: GoogleApi, tokens: &TokenSource) -> anyhow::Result<ApiClient> {
        Ok(ApiClient {
            api,
            base_url: self.base_url_for(api)?,
            http: self.http.clone(),
            tokens: tokens.clone(),
        })
    }
}

#[async_trait]
impl ServiceFactory for GoogleServiceFactory {
    type Bundle = GoogleServices;

    async fn build(
        &self,
        account: Option<&Account>,
        auth: Authorization,
    ) -> anyhow::Result<GoogleServices> {
        let tokens = &auth.tokens;
        Ok(GoogleServices {
            account: account.cloned(),
            drive: self.client(GoogleApi::Drive, tokens)?,
            gmail: self.client(GoogleApi::Gmail, tokens)?,
            calendar: self.client(GoogleApi::Calendar, tokens)?,
            sheets: self.client(GoogleApi::Sheets, tokens)?,
            people: self.client(GoogleApi::People, tokens)?,
            docs: self.client(GoogleApi::Docs, tokens)?,
            tasks: self.client(GoogleApi::Tasks, tokens)?,
            activity: self.client(GoogleApi::Activity, tokens)?,
            keep: self.client(GoogleApi::Keep, tokens)?,
            scopes: auth.scopes,
        })
    }
}
