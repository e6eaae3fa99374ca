use std::{fs, io, path::Path, path::PathBuf};

use challenge_core::{CatalogError, ChallengeDefinition, DefinitionCatalog};
use serde::Deserialize;
use thiserror::Error;

/// Catalog compiled into the binary, used when no catalog path is supplied.
const BUILTIN_CATALOG: &str = include_str!("../data/definitions.json");

/// Errors raised while loading a definition catalog.
#[derive(Debug, Error)]
pub(crate) enum CatalogLoadError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {path}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The catalog is not valid JSON or does not match the schema.
    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),
    /// A definition failed validation or was duplicated.
    #[error(transparent)]
    Invalid(#[from] CatalogError),
    /// The catalog contains no definitions.
    #[error("catalog contains no definitions")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    definitions: Vec<ChallengeDefinition>,
}

/// Loads the catalog at `path`, or the builtin catalog when `path` is `None`.
pub(crate) fn load(path: Option<&Path>) -> Result<DefinitionCatalog, CatalogLoadError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|source| CatalogLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse(&json)
        }
        None => parse(BUILTIN_CATALOG),
    }
}

/// Parses and validates a catalog document.
pub(crate) fn parse(json: &str) -> Result<DefinitionCatalog, CatalogLoadError> {
    let file: CatalogFile = serde_json::from_str(json)?;
    if file.definitions.is_empty() {
        return Err(CatalogLoadError::Empty);
    }
    Ok(DefinitionCatalog::from_definitions(file.definitions)?)
}
