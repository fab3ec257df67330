//! Value transformers applied to attribute values on the way in or out.
//!
//! Transformers are looked up by tag when a descriptor is built, so a schema
//! file can name them as plain strings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DiffError, Result};

/// A pure string-to-string mapping applied to a single field value.
pub trait Transformer: Send + Sync {
    fn transform(&self, value: Option<String>) -> Option<String>;
}

impl<F> Transformer for F
where
    F: Fn(Option<String>) -> Option<String> + Send + Sync,
{
    fn transform(&self, value: Option<String>) -> Option<String> {
        self(value)
    }
}

/// An ordered list of transformers, applied first to last.
#[derive(Clone, Default)]
pub struct TransformerChain {
    steps: Vec<(String, Arc<dyn Transformer>)>,
}

impl TransformerChain {
    pub fn push(&mut self, tag: impl Into<String>, transformer: Arc<dyn Transformer>) {
        self.steps.push((tag.into(), transformer));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(tag, _)| tag.as_str())
    }

    pub fn apply(&self, value: Option<String>) -> Option<String> {
        self.steps
            .iter()
            .fold(value, |acc, (_, step)| step.transform(acc))
    }
}

impl fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tags()).finish()
    }
}

/// Tag -> transformer lookup used while loading descriptors.
#[derive(Clone)]
pub struct TransformerRegistry {
    entries: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// An empty registry with no tags.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, transformer: Arc<dyn Transformer>) {
        self.entries.insert(tag.into(), transformer);
    }

    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Transformer>> {
        self.entries
            .get(tag)
            .cloned()
            .ok_or_else(|| DiffError::UnknownTransformer(tag.to_string()))
    }

    /// Builds a chain from tags, failing on the first unknown one.
    pub fn chain<'a, I>(&self, tags: I) -> Result<TransformerChain>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut chain = TransformerChain::default();
        for tag in tags {
            chain.push(tag, self.resolve(tag)?);
        }
        Ok(chain)
    }
}

impl Default for TransformerRegistry {
    /// Registry preloaded with the built-in tags.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("trim", Arc::new(|v: Option<String>| v.map(|s| s.trim().to_string())));
        registry.register("upper", Arc::new(|v: Option<String>| v.map(|s| s.to_uppercase())));
        registry.register("lower", Arc::new(|v: Option<String>| v.map(|s| s.to_lowercase())));
        registry.register(
            "collapse-whitespace",
            Arc::new(|v: Option<String>| {
                v.map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            }),
        );
        registry.register(
            "strip-leading-zeros",
            Arc::new(|v: Option<String>| {
                v.map(|s| {
                    let stripped = s.trim_start_matches('0');
                    if stripped.is_empty() && !s.is_empty() {
                        "0".to_string()
                    } else {
                        stripped.to_string()
                    }
                })
            }),
        );
        registry
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.entries.keys().collect();
        tags.sort();
        f.debug_struct("TransformerRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_applies_in_order() {
        let registry = TransformerRegistry::default();
        let chain = registry.chain(["trim", "upper"]).unwrap();
        assert_eq!(chain.apply(Some("  ab c ".into())), Some("AB C".into()));
        assert_eq!(chain.apply(None), None);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let registry = TransformerRegistry::default();
        let err = registry.chain(["trim", "dictionary"]).err().unwrap();
        assert!(matches!(err, DiffError::UnknownTransformer(tag) if tag == "dictionary"));
    }

    #[test]
    fn test_strip_leading_zeros_keeps_single_zero() {
        let registry = TransformerRegistry::default();
        let chain = registry.chain(["strip-leading-zeros"]).unwrap();
        assert_eq!(chain.apply(Some("000120".into())), Some("120".into()));
        assert_eq!(chain.apply(Some("000".into())), Some("0".into()));
        assert_eq!(chain.apply(Some("".into())), Some("".into()));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = TransformerRegistry::empty();
        registry.register("prefix", Arc::new(|v: Option<String>| v.map(|s| format!("x{s}"))));
        let chain = registry.chain(["prefix", "prefix"]).unwrap();
        assert_eq!(chain.apply(Some("1".into())), Some("xx1".into()));
    }
}
