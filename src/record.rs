//! Parsed records with their derived composite key and payload digest.
//!
//! Equality of entities is decided on the [`Key`] alone; equality of content
//! on the [`PayloadHash`]. Both are computed once, when the record is built, and
//! never change afterwards.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::descriptor::{Descriptor, SchemaId};
use crate::error::{DiffError, Result};

/// Field name -> value of one row. `None` marks an empty field.
pub type Entity = HashMap<String, Option<String>>;

/// Composite identifier: identifier values concatenated in descriptor order.
///
/// Empty parts contribute nothing, so `["ab", "c"]` and `["a", "bc"]` build
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    schema: SchemaId,
    value: String,
}

impl Key {
    pub fn new<S: AsRef<str>>(schema: SchemaId, fields: &[S]) -> Self {
        let mut value = String::new();
        for field in fields {
            value.push_str(field.as_ref());
        }
        Self { schema, value }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Lexicographic order; keys from different schemas are not comparable.
    pub fn try_cmp(&self, other: &Key) -> Result<Ordering> {
        if self.schema != other.schema {
            return Err(DiffError::Usage(
                "keys built from different descriptors cannot be compared".into(),
            ));
        }
        Ok(self.value.cmp(&other.value))
    }

    pub fn eq_ignore_case(&self, other: &Key) -> bool {
        self.schema == other.schema && self.value.to_lowercase() == other.value.to_lowercase()
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by value within a schema. Sorting mixed schemas is meaningless but
/// still total: the schema id breaks ties.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| self.schema.cmp(&other.schema))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Hex-encoded SHA-256 over the non-empty payload values, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadHash {
    schema: SchemaId,
    value: String,
}

impl PayloadHash {
    pub fn new(schema: SchemaId, fields: &[Option<String>]) -> Self {
        let mut hasher = Sha256::new();
        for content in fields.iter().map(|f| f.as_deref().unwrap_or("")) {
            if !content.is_empty() {
                hasher.update(content.as_bytes());
            }
        }
        Self {
            schema,
            value: hex::encode(hasher.finalize()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn try_eq(&self, other: &PayloadHash) -> Result<bool> {
        if self.schema != other.schema {
            return Err(DiffError::Usage(
                "hashes built from different descriptors cannot be compared".into(),
            ));
        }
        Ok(self.value == other.value)
    }
}

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// One row of a record file.
#[derive(Debug, Clone)]
pub struct Record {
    entity: Entity,
    key: Key,
    hash: PayloadHash,
}

impl Record {
    /// Derives key and hash from the entity through the descriptor.
    pub fn new(descriptor: &Descriptor, entity: Entity) -> Self {
        let schema = descriptor.schema_id();
        let key = Key::new(schema, &descriptor.identifier_fields(&entity));
        let hash = PayloadHash::new(schema, &descriptor.payload_fields(&entity));
        Self { entity, key, hash }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn into_entity(self) -> Entity {
        self.entity
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn hash(&self) -> &PayloadHash {
        &self.hash
    }

    /// Value of a field, `None` when absent or empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entity.get(name).and_then(|v| v.as_deref())
    }

    pub fn compare_key(&self, other: &Record) -> Result<Ordering> {
        self.key.try_cmp(&other.key)
    }

    /// True when both payloads digest to the same value.
    pub fn compare_payload(&self, other: &Record) -> Result<bool> {
        self.hash.try_eq(&other.hash)
    }

    /// Lexicographic comparison of one named field present in both records.
    pub fn compare_field(&self, other: &Record, name: &str) -> Result<Ordering> {
        let missing = || DiffError::Usage(format!("field `{name}` not present in record"));
        let mine = self.entity.get(name).ok_or_else(missing)?;
        let theirs = other.entity.get(name).ok_or_else(missing)?;
        Ok(mine.as_deref().unwrap_or("").cmp(theirs.as_deref().unwrap_or("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Attribute;

    fn people() -> Descriptor {
        Descriptor::delimited(vec![
            Attribute::string("id").identifier(),
            Attribute::string("name"),
            Attribute::string("mail"),
        ])
        .unwrap()
    }

    fn record(d: &Descriptor, id: &str, name: Option<&str>, mail: Option<&str>) -> Record {
        let mut entity = Entity::new();
        entity.insert("id".into(), Some(id.into()));
        entity.insert("name".into(), name.map(str::to_string));
        entity.insert("mail".into(), mail.map(str::to_string));
        Record::new(d, entity)
    }

    #[test]
    fn test_key_concatenation_is_ambiguous() {
        let schema = people().schema_id();
        assert_eq!(Key::new(schema, &["ab", "c"]), Key::new(schema, &["a", "bc"]));
        assert_eq!(Key::new(schema, &["a", "", "b"]).as_str(), "ab");
    }

    #[test]
    fn test_key_order_is_lexicographic() {
        let d = people();
        let a = record(&d, "10", None, None);
        let b = record(&d, "9", None, None);
        assert_eq!(a.compare_key(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare_key(&a).unwrap(), Ordering::Greater);
        assert_eq!(a.compare_key(&a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_null_and_empty_hash_alike() {
        let d = people();
        let a = record(&d, "1", Some("A"), None);
        let b = record(&d, "1", Some("A"), Some(""));
        assert!(a.compare_payload(&b).unwrap());
        assert_eq!(a.hash().as_str().len(), 64);
    }

    #[test]
    fn test_payload_change_flips_hash() {
        let d = people();
        let a = record(&d, "1", Some("A"), Some("a@x"));
        let b = record(&d, "1", Some("B"), Some("a@x"));
        assert!(!a.compare_payload(&b).unwrap());
    }

    #[test]
    fn test_identifier_change_keeps_hash() {
        let d = people();
        let a = record(&d, "1", Some("A"), None);
        let b = record(&d, "2", Some("A"), None);
        assert!(a.compare_payload(&b).unwrap());
    }

    #[test]
    fn test_cross_schema_comparison_is_an_error() {
        let d = people();
        let other = Descriptor::delimited(vec![Attribute::string("id").identifier()]).unwrap();
        let a = record(&d, "1", None, None);
        let mut entity = Entity::new();
        entity.insert("id".into(), Some("1".into()));
        let b = Record::new(&other, entity);
        assert!(matches!(a.compare_key(&b), Err(DiffError::Usage(_))));
        assert!(matches!(a.compare_payload(&b), Err(DiffError::Usage(_))));
        assert!(!a.key().eq_ignore_case(b.key()));
    }

    #[test]
    fn test_compare_field() {
        let d = people();
        let a = record(&d, "1", Some("Ann"), None);
        let b = record(&d, "2", Some("Bob"), None);
        assert_eq!(a.compare_field(&b, "name").unwrap(), Ordering::Less);
        assert_eq!(a.compare_field(&b, "mail").unwrap(), Ordering::Equal);
        assert!(a.compare_field(&b, "phone").is_err());
    }

    #[test]
    fn test_key_eq_ignore_case() {
        let schema = people().schema_id();
        assert!(Key::new(schema, &["AbC"]).eq_ignore_case(&Key::new(schema, &["abc"])));
    }
}
