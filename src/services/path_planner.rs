//! Destination planning for organized files
//!
//! Pure path arithmetic: nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::config::{Library, OrganizeMode};
use crate::services::filename_parser::ParsedIdentifier;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("source path '{}' escapes the library", path.display())]
    UnsafePath { path: PathBuf },

    #[error("library '{library}' needs an identifier to plan '{}'", path.display())]
    MissingIdentifier { library: String, path: PathBuf },
}

/// Compute the destination of a file inside `library.target_path`.
///
/// `relative_source` is the file's path relative to the library's download
/// path. System mode mirrors it verbatim; label mode ignores it and builds
/// `{label}/{code}/{code}[-CD{n}].{ext}` from the identifier.
pub fn plan(
    relative_source: &Path,
    identifier: Option<&ParsedIdentifier>,
    library: &Library,
) -> Result<PathBuf, PlanError> {
    let relative = sanitize_relative(relative_source)?;

    match &library.mode {
        OrganizeMode::System => Ok(library.target_path.join(relative)),
        OrganizeMode::Label { label } => {
            let identifier = identifier.ok_or_else(|| PlanError::MissingIdentifier {
                library: library.name.clone(),
                path: relative_source.to_path_buf(),
            })?;
            Ok(library
                .target_path
                .join(label)
                .join(&identifier.code)
                .join(label_file_name(identifier)))
        }
    }
}

/// `{code}.{ext}` or `{code}-CD{n}.{ext}`
pub fn label_file_name(identifier: &ParsedIdentifier) -> String {
    match identifier.cd_index {
        Some(n) => format!("{}-CD{}.{}", identifier.code, n, identifier.extension),
        None => format!("{}.{}", identifier.code, identifier.extension),
    }
}

/// Keep only normal components; anything that could climb out of the target is rejected
fn sanitize_relative(path: &Path) -> Result<PathBuf, PlanError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PlanError::UnsafePath {
                    path: path.to_path_buf(),
                });
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PlanError::UnsafePath {
            path: path.to_path_buf(),
        });
    }
    Ok(clean)
}
