use waypoint_core::{FsListing, Route};

use crate::error::ApiError;
use crate::executor::{ApiExecutor, ApiRequest};

/// Listing and mutations, all routed through the retrying executor.
#[derive(Clone)]
pub struct FsApi {
    executor: ApiExecutor,
}

impl FsApi {
    pub fn new(executor: ApiExecutor) -> Self {
        Self { executor }
    }

    pub async fn list(&self, path: &str) -> Result<FsListing, ApiError> {
        let mut listing: FsListing = self
            .executor
            .execute_json(&ApiRequest::route(Route::List { path }))
            .await?;
        for item in &mut listing.items {
            if item.path.is_empty() {
                item.path = join_path(path, &item.name);
            }
        }
        Ok(listing)
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), ApiError> {
        self.executor
            .execute_checked(&ApiRequest::route(Route::Mkdir { path }))
            .await?;
        Ok(())
    }

    pub async fn move_entry(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), ApiError> {
        self.executor
            .execute_checked(&ApiRequest::route(Route::Move {
                src,
                dst,
                overwrite,
            }))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        self.executor
            .execute_checked(&ApiRequest::route(Route::Delete { path, recursive }))
            .await?;
        Ok(())
    }
}

/// Joins a remote folder and an entry name; the root folder is the empty string.
pub fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}
