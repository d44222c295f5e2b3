use reqwest::Method;
use url::Url;
use url::form_urlencoded::Serializer;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Every backend route the client talks to, with its query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Login,
    Refresh,
    Logout,
    List {
        path: &'a str,
    },
    Mkdir {
        path: &'a str,
    },
    Move {
        src: &'a str,
        dst: &'a str,
        overwrite: bool,
    },
    Delete {
        path: &'a str,
        recursive: bool,
    },
    Upload {
        path: &'a str,
        overwrite: bool,
    },
    Download {
        path: &'a str,
    },
}

impl Route<'_> {
    pub fn method(&self) -> Method {
        match self {
            Route::List { .. } | Route::Download { .. } => Method::GET,
            Route::Delete { .. } => Method::DELETE,
            Route::Login
            | Route::Refresh
            | Route::Logout
            | Route::Mkdir { .. }
            | Route::Move { .. }
            | Route::Upload { .. } => Method::POST,
        }
    }

    pub fn path_and_query(&self) -> String {
        match *self {
            Route::Login => "/auth/login".to_string(),
            Route::Refresh => "/auth/refresh".to_string(),
            Route::Logout => "/auth/logout".to_string(),
            Route::List { path } => with_query("/fs/list", &[("path", path)]),
            Route::Mkdir { path } => with_query("/fs/mkdir", &[("path", path), ("parents", "true")]),
            Route::Move {
                src,
                dst,
                overwrite,
            } => with_query(
                "/fs/move",
                &[("src", src), ("dst", dst), ("overwrite", bool_str(overwrite))],
            ),
            Route::Delete { path, recursive } => with_query(
                "/fs/delete",
                &[("path", path), ("recursive", bool_str(recursive))],
            ),
            Route::Upload { path, overwrite } => with_query(
                "/fs/upload",
                &[("path", path), ("overwrite", bool_str(overwrite))],
            ),
            Route::Download { path } => with_query("/fs/download", &[("path", path)]),
        }
    }
}

/// Resolves route paths against the configured backend base URL.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base_url: Url,
}

impl ApiEndpoints {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resolve(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        self.base_url
            .join(path_and_query.trim_start_matches('/'))
    }

    pub fn route(&self, route: Route<'_>) -> Result<Url, url::ParseError> {
        self.resolve(&route.path_and_query())
    }

    /// The change feed lives on the same host, over `ws`/`wss`.
    pub fn events_url(&self, access_token: &str) -> Result<Url, url::ParseError> {
        let mut url = self.resolve("events")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always an allowed scheme change for special schemes
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut().append_pair("token", access_token);
        Ok(url)
    }
}

fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    let mut query = Serializer::new(String::new());
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
    format!("{path}?{}", query.finish())
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
