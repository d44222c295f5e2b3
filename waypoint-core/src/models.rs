use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token pair returned by both `/auth/login` and `/auth/refresh`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FsItem {
    #[serde(default)]
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FsListing {
    #[serde(default)]
    pub path: String,
    pub items: Vec<FsItem>,
}

impl FsListing {
    pub fn find(&self, name: &str) -> Option<&FsItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

/// Extracts the changed paths from one change-feed message.
///
/// Malformed payloads and entries whose `path` is not a string are dropped.
pub fn parse_change_paths(payload: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };
    value
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|event| event.get("path").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_tolerates_missing_optional_fields() {
        let listing: FsListing = serde_json::from_str(
            r#"{"path":"Docs","items":[
                {"name":"a.txt","is_dir":false,"size":3,"mtime":10,"etag":"W/\"1-3\""},
                {"name":"sub","is_dir":true}
            ]}"#,
        )
        .unwrap();

        assert_eq!(listing.items.len(), 2);
        assert_eq!(
            listing.find("a.txt").and_then(|i| i.etag.as_deref()),
            Some("W/\"1-3\"")
        );
        assert_eq!(listing.find("sub").map(|i| i.size), Some(0));
        assert!(listing.find("missing").is_none());
    }

    #[test]
    fn change_paths_keep_only_string_paths() {
        let paths = parse_change_paths(
            r#"{"events":[{"change":"Change.added","path":"Docs/a.txt"},{"path":7},{"nope":1},{"path":""}]}"#,
        );
        assert_eq!(paths, vec!["Docs/a.txt".to_string(), String::new()]);
    }

    #[test]
    fn malformed_change_payload_is_ignored() {
        assert!(parse_change_paths("not json").is_empty());
        assert!(parse_change_paths(r#"{"events":"x"}"#).is_empty());
        assert!(parse_change_paths("[]").is_empty());
    }
}
