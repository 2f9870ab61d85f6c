//! Class reference renaming
//!
//! The migration this crate exists for: persisted pickles name their
//! classes through `GLOBAL`/`INST` opcodes, so moving or renaming a class
//! means rewriting those references. A [`Renamer`] is a ready-made
//! transform for [`filter`](fn@crate::pickle::filter).
//!
//! Rename maps are JSON objects keyed by `"module name"` strings:
//!
//! ```json
//! { "old.module OldClass": "new.module NewClass" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pickle::{Argument, Opcode};

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("invalid rename map: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid class reference {0:?}: expected \"module name\"")]
    BadReference(String),

    #[error("failed to read rename map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rewrites `GLOBAL`/`INST` references found in a rename map
#[derive(Debug, Default, Clone)]
pub struct Renamer {
    map: BTreeMap<String, String>,
    applied: usize,
}

impl Renamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, RenameError> {
        let entries: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut renamer = Self::new();
        for (from, to) in entries {
            renamer.insert(from, to)?;
        }
        Ok(renamer)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RenameError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RenameError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let renamer = Self::from_json(&json)?;
        log::info!("Loaded {} rename(s) from {}", renamer.len(), path.display());
        Ok(renamer)
    }

    /// Add a rename; both sides must be `"module name"` references.
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) -> Result<(), RenameError> {
        let from = validate(from.into())?;
        let to = validate(to.into())?;
        self.map.insert(from, to);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of references rewritten so far
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn lookup(&self, reference: &str) -> Option<&str> {
        self.map.get(reference).map(String::as_str)
    }

    /// Filter transform: replace a mapped class reference, leave
    /// everything else unchanged.
    pub fn apply(&mut self, opcode: Opcode, arg: &Argument) -> Option<(Opcode, Argument)> {
        if !matches!(opcode, Opcode::Global | Opcode::Inst) {
            return None;
        }
        let reference = arg.as_text()?;
        let target = self.map.get(reference)?;
        self.applied += 1;
        log::debug!("{}: {} -> {}", opcode, reference, target);
        Some((opcode, Argument::Text(target.clone())))
    }
}

fn validate(reference: String) -> Result<String, RenameError> {
    let valid = match reference.split_once(' ') {
        Some((module, name)) => {
            !module.is_empty()
                && !name.is_empty()
                && !name.contains(' ')
                && !reference.contains('\n')
        }
        None => false,
    };
    if valid {
        Ok(reference)
    } else {
        Err(RenameError::BadReference(reference))
    }
}
