use std::path::PathBuf;

use thiserror::Error;
use waypoint_core::FsListing;

use super::{UploadSpec, file_name_of};
use crate::fs_api::join_path;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadGuardError {
    #[error("\"{0}\" already exists; upload with overwrite to replace it")]
    AlreadyExists(String),
    #[error("local path has no file name: {0}")]
    MissingFileName(PathBuf),
}

/// Decides how to upload `local_path` into `folder` given the folder's current listing.
///
/// A same-named file is only replaced with `overwrite`, and then its ETag becomes
/// the `If-Match` precondition so a concurrent remote change is not clobbered.
pub fn plan_upload(
    listing: &FsListing,
    folder: &str,
    local_path: impl Into<PathBuf>,
    overwrite: bool,
) -> Result<UploadSpec, UploadGuardError> {
    let local_path = local_path.into();
    let name = file_name_of(&local_path);
    if name.is_empty() {
        return Err(UploadGuardError::MissingFileName(local_path));
    }
    let spec = UploadSpec::new(local_path, join_path(folder, &name));

    match listing.find(&name).filter(|existing| !existing.is_dir) {
        None => Ok(spec),
        Some(_) if !overwrite => Err(UploadGuardError::AlreadyExists(name)),
        Some(existing) => Ok(spec.overwrite(existing.etag.clone())),
    }
}
