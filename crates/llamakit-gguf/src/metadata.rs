//! Ordered, key-unique metadata table.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};

use crate::codec::{Decoder, Encoder};
use crate::constants::keys;
use crate::error::{GgufError, Result};
use crate::value::GgufValue;

/// Metadata entries in insertion order with a hash index by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    entries: Vec<(String, GgufValue)>,
    index: HashMap<String, usize>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Never overwrites: an existing key is an error and
    /// leaves the table unchanged.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<GgufValue>) -> Result<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(GgufError::DuplicateKey { key });
        }
        let value = value.into();
        if key == keys::general::ALIGNMENT {
            validate_alignment(&value)?;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }

    /// Overwrite the value of an existing key in place, or append it.
    /// Returns the previous value.
    pub fn replace(&mut self, key: impl Into<String>, value: impl Into<GgufValue>) -> Result<Option<GgufValue>> {
        let key = key.into();
        let value = value.into();
        if key == keys::general::ALIGNMENT {
            validate_alignment(&value)?;
        }
        match self.index.get(&key) {
            Some(&i) => Ok(Some(std::mem::replace(&mut self.entries[i].1, value))),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                Ok(None)
            }
        }
    }

    /// Remove an entry, preserving the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<GgufValue> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    /// Rename `from` to `to`, keeping its position. Returns `Ok(false)` if
    /// `from` is absent; fails if `to` already exists.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<bool> {
        let to = to.into();
        if self.index.contains_key(&to) {
            return Err(GgufError::DuplicateKey { key: to });
        }
        let Some(i) = self.index.remove(from) else {
            return Ok(false);
        };
        if to == keys::general::ALIGNMENT {
            if let Err(e) = validate_alignment(&self.entries[i].1) {
                self.index.insert(from.to_owned(), i);
                return Err(e);
            }
        }
        self.entries[i].0.clone_from(&to);
        self.index.insert(to, i);
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &GgufValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Alignment recorded under `general.alignment`, if any.
    pub fn alignment(&self) -> Result<Option<u32>> {
        self.get(keys::general::ALIGNMENT).map(validate_alignment).transpose()
    }

    /// Encode every entry as key, type tag, value.
    pub fn write_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<()> {
        for (key, value) in &self.entries {
            enc.put_str(key)?;
            enc.put_tagged_value(value)?;
        }
        Ok(())
    }

    /// Decode `count` entries.
    pub fn read_from<R: Read + Seek>(dec: &mut Decoder<R>, count: u64) -> Result<Self> {
        // Smallest entry: key length + type tag + one-byte value.
        dec.ensure_remaining(count.saturating_mul(13))?;
        let mut table = Self::new();
        table.entries.reserve(usize::try_from(count).unwrap_or(0).min(4096));
        for _ in 0..count {
            let key = dec.read_string()?;
            let value = dec.read_tagged_value()?;
            if key == keys::general::ALIGNMENT {
                validate_alignment(&value)?;
            }
            if table.index.contains_key(&key) {
                return Err(GgufError::InvalidMetadata { key, reason: "key appears more than once".into() });
            }
            table.index.insert(key.clone(), table.entries.len());
            table.entries.push((key, value));
        }
        Ok(table)
    }
}

impl<'a> IntoIterator for &'a MetadataTable {
    type Item = (&'a str, &'a GgufValue);
    type IntoIter = Box<dyn ExactSizeIterator<Item = (&'a str, &'a GgufValue)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// `general.alignment` must be a non-zero power-of-two u32.
pub(crate) fn validate_alignment(value: &GgufValue) -> Result<u32> {
    match value {
        GgufValue::Uint32(a) if a.is_power_of_two() => Ok(*a),
        GgufValue::Uint32(a) => Err(GgufError::InvalidAlignment { alignment: u64::from(*a) }),
        other => Err(GgufError::InvalidMetadata {
            key: keys::general::ALIGNMENT.to_owned(),
            reason: format!("expected UINT32, found {}", other.value_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ByteOrder;
    use std::io::Cursor;

    fn sample() -> MetadataTable {
        let mut t = MetadataTable::new();
        t.insert("general.architecture", "llama").unwrap();
        t.insert("a", 1u32).unwrap();
        t.insert("b", 2.5f32).unwrap();
        t
    }

    #[test]
    fn insert_rejects_duplicates_without_overwriting() {
        let mut t = sample();
        let err = t.insert("a", 99u32).unwrap_err();
        assert!(matches!(err, GgufError::DuplicateKey { ref key } if key == "a"));
        assert_eq!(t.get("a"), Some(&GgufValue::Uint32(1)));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let t = sample();
        assert_eq!(t.keys().collect::<Vec<_>>(), ["general.architecture", "a", "b"]);
    }

    #[test]
    fn remove_reindexes_following_entries() {
        let mut t = sample();
        assert_eq!(t.remove("a"), Some(GgufValue::Uint32(1)));
        assert_eq!(t.remove("a"), None);
        assert_eq!(t.get("b"), Some(&GgufValue::Float32(2.5)));
        t.insert("a", 3u8).unwrap();
        assert_eq!(t.keys().collect::<Vec<_>>(), ["general.architecture", "b", "a"]);
    }

    #[test]
    fn rename_keeps_position() {
        let mut t = sample();
        assert!(t.rename("a", "z").unwrap());
        assert!(!t.rename("missing", "y").unwrap());
        assert!(matches!(t.rename("z", "b"), Err(GgufError::DuplicateKey { .. })));
        assert_eq!(t.keys().collect::<Vec<_>>(), ["general.architecture", "z", "b"]);
        assert_eq!(t.get("z"), Some(&GgufValue::Uint32(1)));
        assert!(t.get("a").is_none());
    }

    #[test]
    fn replace_overwrites_or_appends() {
        let mut t = sample();
        assert_eq!(t.replace("a", "now a string").unwrap(), Some(GgufValue::Uint32(1)));
        assert_eq!(t.replace("c", true).unwrap(), None);
        assert_eq!(t.len(), 4);
        assert_eq!(t.get("a").and_then(GgufValue::as_str), Some("now a string"));
    }

    #[test]
    fn alignment_key_is_validated() {
        let mut t = MetadataTable::new();
        assert!(matches!(
            t.insert(keys::general::ALIGNMENT, 48u32),
            Err(GgufError::InvalidAlignment { alignment: 48 })
        ));
        assert!(matches!(
            t.insert(keys::general::ALIGNMENT, 0u32),
            Err(GgufError::InvalidAlignment { alignment: 0 })
        ));
        assert!(matches!(
            t.insert(keys::general::ALIGNMENT, 64u64),
            Err(GgufError::InvalidMetadata { .. })
        ));
        assert!(t.is_empty());
        t.insert(keys::general::ALIGNMENT, 64u32).unwrap();
        assert_eq!(t.alignment().unwrap(), Some(64));
    }

    #[test]
    fn table_roundtrips_through_codec() {
        let t = sample();
        let mut enc = Encoder::new(Vec::new(), ByteOrder::Big);
        t.write_to(&mut enc).unwrap();
        let bytes = enc.into_inner();
        let mut dec = Decoder::new(Cursor::new(bytes), ByteOrder::Big).unwrap();
        let back = MetadataTable::read_from(&mut dec, t.len() as u64).unwrap();
        assert_eq!(back, t);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn absurd_entry_count_is_truncation() {
        let mut dec = Decoder::new(Cursor::new(vec![0u8; 16]), ByteOrder::Little).unwrap();
        let err = MetadataTable::read_from(&mut dec, u64::MAX).unwrap_err();
        assert!(matches!(err, GgufError::Truncated { .. }));
    }
}
