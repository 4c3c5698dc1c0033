use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;

use super::Object;
use crate::Result;

/// Capability interface of one storage layer.
///
/// Tiers are local and expected to be reliable: a tier prone to transient
/// failures retries internally before returning.
#[cfg_attr(test, automock)]
pub trait StorageTier: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn start(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn active(&self) -> bool;

    fn get(
        &self,
        key: &str,
    ) -> Result<Option<Object>>;

    /// Objects matching a glob pattern, ascending by `created`.
    fn get_list(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>>;

    fn set(
        &self,
        key: &str,
        object: Object,
    ) -> Result<()>;

    /// Returns whether the key existed.
    fn del(
        &self,
        key: &str,
    ) -> Result<bool>;

    fn keys(&self) -> Result<Vec<String>>;

    fn clear(&self) -> Result<()>;

    /// Full contents, used to warm faster tiers. Volatile tiers return nothing.
    fn load(&self) -> Result<HashMap<String, Object>> {
        Ok(HashMap::new())
    }
}

pub(crate) fn sort_ascending(objects: &mut [Object]) {
    objects.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
}
