//! Ordered, pattern-matched hooks around storage operations.
//!
//! Each hook kind keeps its own list of `(pattern, hook)` pairs. The first
//! registered pattern matching the operation path wins; when nothing matches
//! the operation passes through untouched. A hook error becomes
//! [`Error::Filter`] and blocks the operation.


use std::sync::Arc;

use tracing::debug;

use crate::key;
use crate::Error;
use crate::Object;
use crate::Result;

pub type HookResult<T> = std::result::Result<T, String>;

pub type WriteFilter = Arc<dyn Fn(&str, Vec<u8>) -> HookResult<Vec<u8>> + Send + Sync>;
pub type ReadObjectFilter = Arc<dyn Fn(&str, Object) -> HookResult<Object> + Send + Sync>;
pub type ReadListFilter = Arc<dyn Fn(&str, Vec<Object>) -> HookResult<Vec<Object>> + Send + Sync>;
pub type DeleteFilter = Arc<dyn Fn(&str) -> HookResult<()> + Send + Sync>;
pub type AfterWrite = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Filters {
    write: Vec<(String, WriteFilter)>,
    read_object: Vec<(String, ReadObjectFilter)>,
    read_list: Vec<(String, ReadListFilter)>,
    delete: Vec<(String, DeleteFilter)>,
    after_write: Vec<(String, AfterWrite)>,
}

impl std::fmt::Debug for Filters {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("write", &patterns(&self.write))
            .field("read_object", &patterns(&self.read_object))
            .field("read_list", &patterns(&self.read_list))
            .field("delete", &patterns(&self.delete))
            .field("after_write", &patterns(&self.after_write))
            .finish()
    }
}

fn patterns<T>(chain: &[(String, T)]) -> Vec<&str> {
    chain.iter().map(|(pattern, _)| pattern.as_str()).collect()
}

/// A glob pattern also applies to the glob path itself (list reads).
fn applies(
    pattern: &str,
    path: &str,
) -> bool {
    pattern == path || key::matches(pattern, path)
}

fn first_match<'a, T>(
    chain: &'a [(String, T)],
    path: &str,
) -> Option<&'a T> {
    chain
        .iter()
        .find(|(pattern, _)| applies(pattern, path))
        .map(|(_, hook)| hook)
}

fn rejected(
    path: &str,
    reason: String,
) -> Error {
    debug!(%path, %reason, "filter rejected operation");
    Error::Filter(reason)
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_write<F>(
        &mut self,
        pattern: impl Into<String>,
        hook: F,
    ) -> &mut Self
    where
        F: Fn(&str, Vec<u8>) -> HookResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.write.push((pattern.into(), Arc::new(hook)));
        self
    }

    pub fn add_read_object<F>(
        &mut self,
        pattern: impl Into<String>,
        hook: F,
    ) -> &mut Self
    where
        F: Fn(&str, Object) -> HookResult<Object> + Send + Sync + 'static,
    {
        self.read_object.push((pattern.into(), Arc::new(hook)));
        self
    }

    pub fn add_read_list<F>(
        &mut self,
        pattern: impl Into<String>,
        hook: F,
    ) -> &mut Self
    where
        F: Fn(&str, Vec<Object>) -> HookResult<Vec<Object>> + Send + Sync + 'static,
    {
        self.read_list.push((pattern.into(), Arc::new(hook)));
        self
    }

    pub fn add_delete<F>(
        &mut self,
        pattern: impl Into<String>,
        hook: F,
    ) -> &mut Self
    where
        F: Fn(&str) -> HookResult<()> + Send + Sync + 'static,
    {
        self.delete.push((pattern.into(), Arc::new(hook)));
        self
    }

    pub fn add_after_write<F>(
        &mut self,
        pattern: impl Into<String>,
        hook: F,
    ) -> &mut Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.after_write.push((pattern.into(), Arc::new(hook)));
        self
    }

    pub fn write(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> Result<Vec<u8>> {
        match first_match(&self.write, path) {
            Some(hook) => hook(path, data).map_err(|reason| rejected(path, reason)),
            None => Ok(data),
        }
    }

    pub fn read_object(
        &self,
        path: &str,
        object: Object,
    ) -> Result<Object> {
        match first_match(&self.read_object, path) {
            Some(hook) => hook(path, object).map_err(|reason| rejected(path, reason)),
            None => Ok(object),
        }
    }

    pub fn read_list(
        &self,
        path: &str,
        objects: Vec<Object>,
    ) -> Result<Vec<Object>> {
        match first_match(&self.read_list, path) {
            Some(hook) => hook(path, objects).map_err(|reason| rejected(path, reason)),
            None => Ok(objects),
        }
    }

    pub fn delete(
        &self,
        path: &str,
    ) -> Result<()> {
        match first_match(&self.delete, path) {
            Some(hook) => hook(path).map_err(|reason| rejected(path, reason)),
            None => Ok(()),
        }
    }

    pub fn after_write(
        &self,
        path: &str,
    ) {
        if let Some(hook) = first_match(&self.after_write, path) {
            hook(path);
        }
    }

    /// Read-filter patterns, in registration order without duplicates.
    pub fn static_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for pattern in patterns(&self.read_object)
            .into_iter()
            .chain(patterns(&self.read_list))
        {
            if !paths.iter().any(|p| p == pattern) {
                paths.push(pattern.to_string());
            }
        }
        paths
    }
}
