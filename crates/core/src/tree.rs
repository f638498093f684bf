//! Tree objects: one directory level of a snapshot
//!
//! A tree maps entry names to blobs (files, symlinks) or to nested trees.
//! Serialization is sorted by name, so structurally identical directories
//! hash identically no matter how the filesystem listed them.

use crate::hash::{hash_bytes, Blake3Hash};
use ahash::AHashMap;
use anyhow::Result;
use smallvec::SmallVec;

const MAGIC: &[u8] = b"SNT2";
/// Length prefix, kind, mode and hash of an entry with an empty name
const MIN_ENTRY_LEN: usize = 2 + 1 + 4 + 32;

/// Mode recorded for nested trees
pub const TREE_MODE: u32 = 0o040000;
/// Mode recorded for symbolic links
pub const SYMLINK_MODE: u32 = 0o120000;

type NameKey = SmallVec<[u8; 64]>;

/// Type of tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file (blob)
    File,
    /// Symbolic link; the blob holds the link target
    Symlink,
    /// Subdirectory
    Tree,
}

impl EntryKind {
    fn to_byte(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Symlink => 1,
            EntryKind::Tree => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(EntryKind::File),
            1 => Ok(EntryKind::Symlink),
            2 => Ok(EntryKind::Tree),
            other => anyhow::bail!("Invalid entry kind: {}", other),
        }
    }

    /// True for entries whose digest names a blob
    pub fn is_blob(self) -> bool {
        !matches!(self, EntryKind::Tree)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    /// Unix permission bits
    pub mode: u32,
    /// Blob digest for files/symlinks, tree digest for subdirectories
    pub hash: Blake3Hash,
}

impl Entry {
    pub fn file(mode: u32, hash: Blake3Hash) -> Self {
        Self {
            kind: EntryKind::File,
            mode,
            hash,
        }
    }

    pub fn symlink(hash: Blake3Hash) -> Self {
        Self {
            kind: EntryKind::Symlink,
            mode: SYMLINK_MODE,
            hash,
        }
    }

    pub fn tree(hash: Blake3Hash) -> Self {
        Self {
            kind: EntryKind::Tree,
            mode: TREE_MODE,
            hash,
        }
    }
}

/// Check that a name is usable as a single path component
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        anyhow::bail!("Invalid entry name: {:?}", name);
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        anyhow::bail!("Entry name contains a separator: {:?}", name);
    }
    Ok(())
}

/// One directory level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: AHashMap<NameKey, Entry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, name: &str, entry: Entry) -> Result<()> {
        validate_entry_name(name)?;
        self.entries.insert(SmallVec::from_slice(name.as_bytes()), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name.as_bytes())
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in canonical (byte-wise name) order
    pub fn sorted_entries(&self) -> Vec<(&str, &Entry)> {
        let mut sorted: Vec<_> = self
            .entries
            .iter()
            // keys only ever come from &str, see insert/deserialize
            .filter_map(|(k, v)| std::str::from_utf8(k).ok().map(|name| (name, v)))
            .collect();
        sorted.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
        sorted
    }

    /// Serialize the tree to bytes (TreeV2 format)
    ///
    /// Format:
    /// - magic: "SNT2" (4 bytes)
    /// - entry_count: u32
    /// - entries (sorted by name bytes):
    ///   - name_len: u16
    ///   - name_bytes: [u8; name_len]
    ///   - kind: u8 (0=file, 1=symlink, 2=tree)
    ///   - mode: u32
    ///   - hash: [u8; 32]
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.entries.len() * 48);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (name, entry) in self.sorted_entries() {
            bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(entry.kind.to_byte());
            bytes.extend_from_slice(&entry.mode.to_le_bytes());
            bytes.extend_from_slice(entry.hash.as_bytes());
        }

        bytes
    }

    /// Deserialize a tree, rejecting non-canonical encodings
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            anyhow::bail!("Invalid tree data: too short");
        }
        if &bytes[0..4] != MAGIC {
            anyhow::bail!("Invalid tree magic bytes");
        }

        let entry_count = u32::from_le_bytes(bytes[4..8].try_into()?) as usize;
        // The count is untrusted; no entry encodes in fewer than MIN_ENTRY_LEN bytes
        let mut entries = AHashMap::with_capacity(entry_count.min((bytes.len() - 8) / MIN_ENTRY_LEN));
        let mut offset = 8;
        let mut previous: Option<NameKey> = None;

        for _ in 0..entry_count {
            if offset + 2 > bytes.len() {
                anyhow::bail!("Invalid tree data: incomplete entry");
            }
            let name_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset += 2;

            if offset + name_len + 1 + 4 + 32 > bytes.len() {
                anyhow::bail!("Invalid tree data: incomplete entry");
            }
            let name = std::str::from_utf8(&bytes[offset..offset + name_len])?;
            validate_entry_name(name)?;
            let key: NameKey = SmallVec::from_slice(name.as_bytes());
            offset += name_len;

            if let Some(prev) = &previous {
                if prev.as_slice() >= key.as_slice() {
                    anyhow::bail!("Invalid tree data: entries not in canonical order");
                }
            }

            let kind = EntryKind::from_byte(bytes[offset])?;
            offset += 1;
            let mode = u32::from_le_bytes(bytes[offset..offset + 4].try_into()?);
            offset += 4;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes[offset..offset + 32]);
            offset += 32;

            previous = Some(key.clone());
            entries.insert(
                key,
                Entry {
                    kind,
                    mode,
                    hash: Blake3Hash::from_bytes(hash),
                },
            );
        }

        if offset != bytes.len() {
            anyhow::bail!("Invalid tree data: {} trailing bytes", bytes.len() - offset);
        }

        Ok(Self { entries })
    }

    /// Digest of the canonical serialization
    pub fn hash(&self) -> Blake3Hash {
        hash_bytes(&self.serialize())
    }
}

/// Differences between two directory levels, by entry name
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    pub added: Vec<(String, Entry)>,
    pub removed: Vec<(String, Entry)>,
    /// (name, old, new)
    pub modified: Vec<(String, Entry, Entry)>,
}

impl TreeDiff {
    pub fn diff(old: &Tree, new: &Tree) -> Self {
        let mut diff = TreeDiff::default();

        for (name, new_entry) in new.sorted_entries() {
            match old.get(name) {
                Some(old_entry) if old_entry != new_entry => {
                    diff.modified.push((name.to_string(), *old_entry, *new_entry));
                }
                Some(_) => {}
                None => diff.added.push((name.to_string(), *new_entry)),
            }
        }

        for (name, old_entry) in old.sorted_entries() {
            if new.get(name).is_none() {
                diff.removed.push((name.to_string(), *old_entry));
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(content: &[u8]) -> Entry {
        Entry::file(0o644, hash_bytes(content))
    }

    #[test]
    fn test_tree_insert_get_remove() -> Result<()> {
        let mut tree = Tree::new();
        tree.insert("save.dat", file(b"data"))?;

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("save.dat"), Some(&file(b"data")));
        assert_eq!(tree.remove("save.dat"), Some(file(b"data")));
        assert!(tree.is_empty());
        Ok(())
    }

    #[test]
    fn test_tree_rejects_path_like_names() {
        let mut tree = Tree::new();
        assert!(tree.insert("a/b", file(b"x")).is_err());
        assert!(tree.insert("..", file(b"x")).is_err());
        assert!(tree.insert("", file(b"x")).is_err());
    }

    #[test]
    fn test_tree_serialization_roundtrip() -> Result<()> {
        let mut tree = Tree::new();
        tree.insert("world.dat", file(b"world"))?;
        tree.insert("maps", Entry::tree(hash_bytes(b"subtree")))?;
        tree.insert("current", Entry::symlink(hash_bytes(b"maps/0.map")))?;

        let decoded = Tree::deserialize(&tree.serialize())?;
        assert_eq!(decoded, tree);
        assert_eq!(decoded.get("maps").map(|e| e.kind), Some(EntryKind::Tree));
        assert_eq!(decoded.get("current").map(|e| e.mode), Some(SYMLINK_MODE));
        Ok(())
    }

    #[test]
    fn test_tree_hash_order_independent() -> Result<()> {
        let mut tree1 = Tree::new();
        let mut tree2 = Tree::new();

        tree1.insert("a.txt", file(b"1"))?;
        tree1.insert("b.txt", file(b"2"))?;
        tree2.insert("b.txt", file(b"2"))?;
        tree2.insert("a.txt", file(b"1"))?;

        assert_eq!(tree1.serialize(), tree2.serialize());
        assert_eq!(tree1.hash(), tree2.hash());
        Ok(())
    }

    #[test]
    fn test_tree_hash_changes_with_mode() -> Result<()> {
        let mut plain = Tree::new();
        let mut exec = Tree::new();
        plain.insert("run.sh", Entry::file(0o644, hash_bytes(b"#!")))?;
        exec.insert("run.sh", Entry::file(0o755, hash_bytes(b"#!")))?;
        assert_ne!(plain.hash(), exec.hash());
        Ok(())
    }

    #[test]
    fn test_tree_rejects_unsorted_encoding() -> Result<()> {
        let mut tree = Tree::new();
        tree.insert("a", file(b"1"))?;
        tree.insert("b", file(b"2"))?;
        let mut bytes = tree.serialize();

        // swap the two single-byte names in place
        let first = 8 + 2;
        let second = first + 1 + 1 + 4 + 32 + 2;
        bytes.swap(first, second);
        assert!(Tree::deserialize(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn test_tree_rejects_trailing_bytes() {
        let mut bytes = Tree::new().serialize();
        bytes.push(0);
        assert!(Tree::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_tree_rejects_oversized_entry_count() {
        let result = Tree::deserialize(b"SNT2\xff\xff\xff\x7f");
        assert!(result.is_err());

        let mut bytes = Tree::new().serialize();
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(Tree::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_tree_magic_validation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BAD1");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(Tree::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_tree_diff_complex() -> Result<()> {
        let mut old_tree = Tree::new();
        let mut new_tree = Tree::new();

        old_tree.insert("kept", file(b"same"))?;
        old_tree.insert("gone", file(b"old"))?;
        old_tree.insert("changed", file(b"v1"))?;

        new_tree.insert("kept", file(b"same"))?;
        new_tree.insert("changed", file(b"v2"))?;
        new_tree.insert("fresh", file(b"new"))?;

        let diff = TreeDiff::diff(&old_tree, &new_tree);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].0, "fresh");
        assert_eq!(diff.removed[0].0, "gone");
        assert_eq!(diff.modified[0].0, "changed");
        assert!(TreeDiff::diff(&new_tree, &new_tree).is_empty());
        Ok(())
    }
}
