// In: src/schema/registry.rs

//! Schema lookup.
//!
//! The decoder only needs [`SchemaCatalog::lookup`]. [`SchemaRegistry`] is the
//! in-process implementation: a map behind an `Arc` that is rebuilt off to the
//! side and swapped in one step, so readers never see a half-loaded catalog.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;

use crate::error::CmlError;
use crate::schema::Schema;

/// Resolves a message type to its schema.
///
/// A miss must be reported as [`CmlError::SchemaNotFound`] so callers can tell it
/// apart from a malformed schema.
pub trait SchemaCatalog: Send + Sync {
    fn lookup(&self, message_type: &str) -> Result<Arc<Schema>, CmlError>;
}

type SchemaMap = HashMap<String, Arc<Schema>>;

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<Arc<SchemaMap>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schemas<I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = Schema>,
    {
        let registry = Self::new();
        registry.replace_all(schemas);
        registry
    }

    /// Builds a registry from JSON schema documents. Any unparsable document fails the whole call.
    pub fn from_json_documents<'a, I>(documents: I) -> Result<Self, CmlError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let schemas = documents
            .into_iter()
            .map(Schema::from_json_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_schemas(schemas))
    }

    fn snapshot(&self) -> Arc<SchemaMap> {
        Arc::clone(&self.schemas.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the visible schema map in a single swap.
    pub fn replace_all<I>(&self, schemas: I)
    where
        I: IntoIterator<Item = Schema>,
    {
        let map: SchemaMap = schemas
            .into_iter()
            .map(|s| (s.message_type.clone(), Arc::new(s)))
            .collect();
        let count = map.len();
        *self.schemas.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        log::info!("Schema registry now holds {} schemas", count);
    }

    /// Adds or replaces a single schema, copying the current map first.
    pub fn insert(&self, schema: Schema) {
        let mut guard = self.schemas.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: SchemaMap = (**guard).clone();
        next.insert(schema.message_type.clone(), Arc::new(schema));
        *guard = Arc::new(next);
    }

    /// Loads every `*.json` file below `dir` (recursively) and swaps them in.
    ///
    /// Files that fail to parse are logged and skipped. If the directory itself
    /// cannot be read the previous map stays live and the error is returned.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, CmlError> {
        let mut files = Vec::new();
        collect_json_files(dir, &mut files)?;
        files.sort();

        let mut schemas = Vec::with_capacity(files.len());
        for path in &files {
            match std::fs::read_to_string(path)
                .map_err(CmlError::from)
                .and_then(|text| Schema::from_json_str(&text))
            {
                Ok(schema) => {
                    log::debug!("  - {} ({})", schema.message_type, path.display());
                    schemas.push(schema);
                }
                Err(e) => log::error!("Skipping schema file {}: {}", path.display(), e),
            }
        }

        let loaded = schemas.len();
        self.replace_all(schemas);
        log::info!("Loaded {} schemas from {}", loaded, dir.display());
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.snapshot().contains_key(message_type)
    }

    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.snapshot().keys().cloned().collect();
        types.sort();
        types
    }
}

impl SchemaCatalog for SchemaRegistry {
    fn lookup(&self, message_type: &str) -> Result<Arc<Schema>, CmlError> {
        self.snapshot()
            .get(message_type)
            .cloned()
            .ok_or_else(|| CmlError::SchemaNotFound(message_type.to_string()))
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CmlError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
