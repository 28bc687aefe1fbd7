//! In-memory metadata store backed by the `USNP` snapshot container.

use crate::{MetaStore, StoreTxn};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use undelfs_error::{Result, UndelfsError};
use undelfs_ondisk::{
    encode_snapshot, parse_snapshot, DirEntry, EntryKind, RootItem, RootRef,
};
use undelfs_types::{
    InodeNumber, SubvolId, TreeKey, DIR_ITEM_KEY, FIRST_FREE_OBJECTID, FS_TREE_OBJECTID,
    INODE_ITEM_KEY, ORPHAN_ITEM_KEY, ORPHAN_OBJECTID, ROOT_BACKREF_KEY, ROOT_ITEM_KEY,
    ROOT_REF_KEY,
};

/// Key-ordered in-memory metadata index.
///
/// Roots, orphan markers, inode items, directory entries, and root refs
/// all live in one `BTreeMap<TreeKey, Vec<u8>>`, mirroring a single
/// metadata tree. A fresh store contains only the filesystem root
/// directory inode.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetaStore {
    items: BTreeMap<TreeKey, Vec<u8>>,
}

impl MemoryMetaStore {
    /// Empty index with the filesystem root directory in place.
    #[must_use]
    pub fn new() -> Self {
        let mut store = Self {
            items: BTreeMap::new(),
        };
        store.items.insert(
            TreeKey::new(FIRST_FREE_OBJECTID, INODE_ITEM_KEY, 0),
            Vec::new(),
        );
        store
    }

    // ── Fixture construction ────────────────────────────────────────────

    /// Insert a raw record, replacing any existing payload at `key`.
    pub fn insert_record(&mut self, key: TreeKey, payload: Vec<u8>) {
        self.items.insert(key, payload);
    }

    /// Create a live subvolume root descriptor.
    pub fn create_subvol(&mut self, subvol: SubvolId, generation: u64) {
        self.items.insert(
            TreeKey::root(subvol),
            RootItem::new(generation).to_bytes().to_vec(),
        );
    }

    /// Mark a subvolume's deletion as begun: set the dead flag on its root
    /// descriptor and add the orphan marker.
    ///
    /// Missing roots are tolerated so fixtures can model fully destroyed
    /// subvolumes whose marker outlived the root.
    pub fn begin_deletion(&mut self, subvol: SubvolId) {
        if let Some(payload) = self.items.get_mut(&TreeKey::root(subvol)) {
            if let Ok(mut item) = RootItem::parse(payload) {
                item.set_dead();
                *payload = item.to_bytes().to_vec();
            }
        }
        self.items.insert(TreeKey::orphan(subvol), Vec::new());
    }

    /// Advance a subvolume's deletion progress cursor, marking the tree
    /// partially destroyed.
    pub fn set_drop_progress(&mut self, subvol: SubvolId, progress: TreeKey) {
        if let Some(payload) = self.items.get_mut(&TreeKey::root(subvol)) {
            if let Ok(mut item) = RootItem::parse(payload) {
                item.drop_progress = progress;
                *payload = item.to_bytes().to_vec();
            }
        }
    }

    // ── Read helpers ────────────────────────────────────────────────────

    /// Number of records in the index.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.items.len()
    }

    /// Whether a record exists at `key`.
    #[must_use]
    pub fn contains_key(&self, key: TreeKey) -> bool {
        self.items.contains_key(&key)
    }

    /// All orphan marker subvolume ids, ascending.
    #[must_use]
    pub fn orphan_ids(&self) -> Vec<SubvolId> {
        self.items
            .range(orphan_range())
            .map(|(key, _)| SubvolId(key.offset))
            .collect()
    }

    /// Committed directory entry `name` under `parent`, if any.
    pub fn dir_entry(&self, parent: InodeNumber, name: &str) -> Result<Option<DirEntry>> {
        let key = dir_entry_key(parent, name);
        match self.items.get(&key) {
            Some(payload) => Ok(Some(DirEntry::parse(payload)?)),
            None => Ok(None),
        }
    }

    /// Committed root descriptor at the exact key, if any.
    pub fn root_item(&self, subvol: SubvolId) -> Result<Option<RootItem>> {
        match self.items.get(&TreeKey::root(subvol)) {
            Some(payload) => Ok(Some(RootItem::parse(payload)?)),
            None => Ok(None),
        }
    }

    // ── Snapshot persistence ────────────────────────────────────────────

    /// Serialize the index into a snapshot buffer.
    #[must_use]
    pub fn to_snapshot_bytes(&self) -> Vec<u8> {
        let records: Vec<(TreeKey, Vec<u8>)> = self
            .items
            .iter()
            .map(|(key, payload)| (*key, payload.clone()))
            .collect();
        encode_snapshot(&records)
    }

    /// Rebuild a store from a snapshot buffer.
    pub fn from_snapshot_bytes(data: &[u8]) -> Result<Self> {
        let records = parse_snapshot(data)?;
        let mut items = BTreeMap::new();
        for (key, payload) in records {
            if items.insert(key, payload).is_some() {
                return Err(UndelfsError::SnapshotCorrupt {
                    detail: format!("duplicate record key {key}"),
                });
            }
        }
        Ok(Self { items })
    }

    /// Load a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_snapshot_bytes(&data)
    }

    /// Write the index to a snapshot file.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_snapshot_bytes())?;
        Ok(())
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// Smallest unused inode number, never below the filesystem root.
    ///
    /// Keys order by objectid first, so inode items are scattered across
    /// the whole index rather than forming one contiguous key range; both
    /// sides filter on the item kind.
    fn next_inode_number(&self, staged: &BTreeMap<TreeKey, Option<Vec<u8>>>) -> Result<u64> {
        let committed_max = self
            .items
            .keys()
            .filter(|key| key.kind == INODE_ITEM_KEY)
            .map(|key| key.objectid)
            .max()
            .unwrap_or(FIRST_FREE_OBJECTID);
        let staged_max = staged
            .keys()
            .filter(|key| key.kind == INODE_ITEM_KEY)
            .map(|key| key.objectid)
            .max()
            .unwrap_or(FIRST_FREE_OBJECTID);
        committed_max
            .max(staged_max)
            .checked_add(1)
            .ok_or_else(|| UndelfsError::storage("inode number space exhausted"))
    }
}

fn orphan_range() -> std::ops::RangeInclusive<TreeKey> {
    TreeKey::new(ORPHAN_OBJECTID, ORPHAN_ITEM_KEY, 0)
        ..=TreeKey::new(ORPHAN_OBJECTID, ORPHAN_ITEM_KEY, u64::MAX)
}

fn dir_entry_key(parent: InodeNumber, name: &str) -> TreeKey {
    TreeKey::new(parent.0, DIR_ITEM_KEY, DirEntry::name_hash(name))
}

impl MetaStore for MemoryMetaStore {
    fn prev_in_range(&self, objectid: u64, kind: u8, upto: u64) -> Result<Option<TreeKey>> {
        let range = TreeKey::new(objectid, kind, 0)..=TreeKey::new(objectid, kind, upto);
        Ok(self.items.range(range).next_back().map(|(key, _)| *key))
    }

    fn resolve_root(&self, subvol: SubvolId) -> Result<Option<RootItem>> {
        let range = TreeKey::new(subvol.0, ROOT_ITEM_KEY, 0)
            ..=TreeKey::new(subvol.0, ROOT_ITEM_KEY, u64::MAX);
        match self.items.range(range).next_back() {
            Some((_, payload)) => Ok(Some(RootItem::parse(payload)?)),
            None => Ok(None),
        }
    }

    fn begin(&mut self, reservation_units: u32) -> Result<Box<dyn StoreTxn + '_>> {
        debug!(
            target: "undelfs::store",
            reservation_units,
            "txn_begin"
        );
        Ok(Box::new(MemTxn {
            store: self,
            staged: BTreeMap::new(),
            reserved: reservation_units,
            used: 0,
        }))
    }
}

/// One open transaction over a [`MemoryMetaStore`].
///
/// `staged` overlays the committed index: `Some(payload)` is an insert or
/// in-place update, `None` a deletion. Dropping the transaction discards
/// the overlay.
struct MemTxn<'a> {
    store: &'a mut MemoryMetaStore,
    staged: BTreeMap<TreeKey, Option<Vec<u8>>>,
    reserved: u32,
    used: u32,
}

impl MemTxn<'_> {
    /// Record view through the staging overlay.
    fn view(&self, key: TreeKey) -> Option<&[u8]> {
        match self.staged.get(&key) {
            Some(Some(payload)) => Some(payload.as_slice()),
            Some(None) => None,
            None => self.store.items.get(&key).map(Vec::as_slice),
        }
    }

    /// Stage one mutation, consuming a reservation unit.
    fn stage(&mut self, key: TreeKey, op: Option<Vec<u8>>) -> Result<()> {
        if self.used >= self.reserved {
            return Err(UndelfsError::ReservationExhausted {
                reserved: self.reserved,
            });
        }
        self.used += 1;
        self.staged.insert(key, op);
        Ok(())
    }
}

impl StoreTxn for MemTxn<'_> {
    fn ensure_dir(&mut self, parent: InodeNumber, name: &str) -> Result<InodeNumber> {
        let key = dir_entry_key(parent, name);
        if let Some(payload) = self.view(key) {
            let entry = DirEntry::parse(payload)?;
            if entry.name != name {
                return Err(UndelfsError::DirNameCollision {
                    key,
                    existing: entry.name,
                    requested: name.to_owned(),
                });
            }
            if entry.kind != EntryKind::Directory {
                return Err(UndelfsError::storage(format!(
                    "entry {name:?} under inode {parent} exists but is not a directory"
                )));
            }
            return Ok(InodeNumber(entry.target));
        }

        let ino = self.store.next_inode_number(&self.staged)?;
        self.stage(TreeKey::new(ino, INODE_ITEM_KEY, 0), Some(Vec::new()))?;
        let entry = DirEntry {
            target: ino,
            kind: EntryKind::Directory,
            name: name.to_owned(),
        };
        self.stage(key, Some(entry.to_bytes()))?;
        debug!(target: "undelfs::store", parent = parent.0, name, ino, "dir_created");
        Ok(InodeNumber(ino))
    }

    fn create_link(&mut self, dir: InodeNumber, name: &str, target: SubvolId) -> Result<()> {
        let key = dir_entry_key(dir, name);
        if let Some(payload) = self.view(key) {
            let entry = DirEntry::parse(payload)?;
            if entry.name == name {
                return Err(UndelfsError::LinkExists {
                    dir: dir.0,
                    name: name.to_owned(),
                });
            }
            return Err(UndelfsError::DirNameCollision {
                key,
                existing: entry.name,
                requested: name.to_owned(),
            });
        }

        let entry = DirEntry {
            target: target.0,
            kind: EntryKind::SubvolRoot,
            name: name.to_owned(),
        };
        self.stage(key, Some(entry.to_bytes()))?;

        let rref = RootRef {
            dirid: dir.0,
            name: name.to_owned(),
        };
        self.stage(
            TreeKey::new(FS_TREE_OBJECTID, ROOT_REF_KEY, target.0),
            Some(rref.to_bytes()),
        )?;
        self.stage(
            TreeKey::new(target.0, ROOT_BACKREF_KEY, FS_TREE_OBJECTID),
            Some(rref.to_bytes()),
        )?;
        debug!(target: "undelfs::store", dir = dir.0, name, subvol = target.0, "link_staged");
        Ok(())
    }

    fn lookup_root_exact(&self, subvol: SubvolId) -> Result<RootItem> {
        match self.view(TreeKey::root(subvol)) {
            Some(payload) => Ok(RootItem::parse(payload)?),
            None => Err(UndelfsError::RootMissing(subvol)),
        }
    }

    fn write_root(&mut self, subvol: SubvolId, item: &RootItem) -> Result<()> {
        let key = TreeKey::root(subvol);
        if self.view(key).is_none() {
            return Err(UndelfsError::RootMissing(subvol));
        }
        self.stage(key, Some(item.to_bytes().to_vec()))
    }

    fn delete_orphan(&mut self, subvol: SubvolId) -> Result<()> {
        let key = TreeKey::orphan(subvol);
        if self.view(key).is_none() {
            return Err(UndelfsError::OrphanMissing(subvol));
        }
        self.stage(key, None)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemTxn { store, staged, .. } = *self;
        let mutations = staged.len();
        for (key, op) in staged {
            match op {
                Some(payload) => {
                    store.items.insert(key, payload);
                }
                None => {
                    store.items.remove(&key);
                }
            }
        }
        debug!(target: "undelfs::store", mutations, "txn_committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use undelfs_types::RECOVERY_DIR_NAME;

    #[test]
    fn prev_in_range_steps_descending() {
        let mut store = MemoryMetaStore::new();
        for id in [5_u64, 9, 20] {
            store.create_subvol(SubvolId(id), 1);
            store.begin_deletion(SubvolId(id));
        }

        let mut seen = Vec::new();
        let mut upto = u64::MAX;
        while let Some(key) = store
            .prev_in_range(ORPHAN_OBJECTID, ORPHAN_ITEM_KEY, upto)
            .unwrap()
        {
            seen.push(key.offset);
            let Some(next) = key.offset.checked_sub(1) else {
                break;
            };
            upto = next;
        }
        assert_eq!(seen, vec![20, 9, 5]);
    }

    #[test]
    fn resolve_root_is_open_ended() {
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(300), 7);
        let item = store.resolve_root(SubvolId(300)).unwrap().unwrap();
        assert_eq!(item.generation, 7);
        assert!(store.resolve_root(SubvolId(301)).unwrap().is_none());
    }

    #[test]
    fn staged_mutations_invisible_until_commit() {
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(10), 1);
        store.begin_deletion(SubvolId(10));

        {
            let mut txn = store.begin(8).unwrap();
            txn.delete_orphan(SubvolId(10)).unwrap();
            // Dropped without commit.
        }
        assert!(store.contains_key(TreeKey::orphan(SubvolId(10))));

        let mut txn = store.begin(8).unwrap();
        txn.delete_orphan(SubvolId(10)).unwrap();
        txn.commit().unwrap();
        assert!(!store.contains_key(TreeKey::orphan(SubvolId(10))));
    }

    #[test]
    fn ensure_dir_is_idempotent_across_transactions() {
        let mut store = MemoryMetaStore::new();
        let root = InodeNumber(FIRST_FREE_OBJECTID);

        let first = {
            let mut txn = store.begin(8).unwrap();
            let ino = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
            txn.commit().unwrap();
            ino
        };
        let second = {
            let mut txn = store.begin(8).unwrap();
            let ino = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
            txn.commit().unwrap();
            ino
        };
        assert_eq!(first, second);

        let entry = store.dir_entry(root, RECOVERY_DIR_NAME).unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.target, first.0);
    }

    #[test]
    fn inode_allocation_ignores_non_inode_records() {
        // Orphan markers sit at the top of the objectid space; they must
        // not feed the inode allocator.
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(300), 1);
        store.begin_deletion(SubvolId(300));
        let root = InodeNumber(FIRST_FREE_OBJECTID);

        let mut txn = store.begin(8).unwrap();
        let dir = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
        txn.commit().unwrap();

        assert_eq!(dir, InodeNumber(FIRST_FREE_OBJECTID + 1));
    }

    #[test]
    fn inode_allocation_exhaustion_is_an_error() {
        let mut store = MemoryMetaStore::new();
        store.insert_record(TreeKey::new(u64::MAX, INODE_ITEM_KEY, 0), Vec::new());
        let root = InodeNumber(FIRST_FREE_OBJECTID);

        let mut txn = store.begin(8).unwrap();
        let err = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap_err();
        assert!(matches!(err, UndelfsError::Storage { .. }));
    }

    #[test]
    fn create_link_rejects_existing_name() {
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(300), 1);
        let root = InodeNumber(FIRST_FREE_OBJECTID);

        let mut txn = store.begin(8).unwrap();
        let dir = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
        txn.create_link(dir, "sub300", SubvolId(300)).unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin(8).unwrap();
        let dir = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
        let err = txn.create_link(dir, "sub300", SubvolId(300)).unwrap_err();
        assert!(matches!(err, UndelfsError::LinkExists { .. }));
    }

    #[test]
    fn reservation_budget_is_a_hard_cap() {
        let mut store = MemoryMetaStore::new();
        let root = InodeNumber(FIRST_FREE_OBJECTID);

        let mut txn = store.begin(2).unwrap();
        let dir = txn.ensure_dir(root, RECOVERY_DIR_NAME).unwrap();
        let err = txn.create_link(dir, "sub1", SubvolId(1)).unwrap_err();
        assert!(matches!(
            err,
            UndelfsError::ReservationExhausted { reserved: 2 }
        ));
        drop(txn);

        // The aborted transaction left nothing behind.
        assert!(store.dir_entry(root, RECOVERY_DIR_NAME).unwrap().is_none());
    }

    #[test]
    fn exact_root_lookup_does_not_fall_back() {
        let mut store = MemoryMetaStore::new();
        let mut txn = store.begin(8).unwrap();
        let err = txn.lookup_root_exact(SubvolId(404)).unwrap_err();
        assert!(matches!(err, UndelfsError::RootMissing(SubvolId(404))));
    }

    #[test]
    fn snapshot_round_trip_preserves_index() {
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(300), 3);
        store.begin_deletion(SubvolId(300));

        let bytes = store.to_snapshot_bytes();
        let restored = MemoryMetaStore::from_snapshot_bytes(&bytes).unwrap();
        assert_eq!(restored.record_count(), store.record_count());
        assert_eq!(restored.orphan_ids(), vec![SubvolId(300)]);
        let item = restored.root_item(SubvolId(300)).unwrap().unwrap();
        assert!(item.is_dead());
    }

    #[test]
    fn snapshot_save_and_load() {
        let mut store = MemoryMetaStore::new();
        store.create_subvol(SubvolId(42), 1);
        store.begin_deletion(SubvolId(42));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.usnp");
        store.save(&path).unwrap();

        let loaded = MemoryMetaStore::load(&path).unwrap();
        assert_eq!(loaded.orphan_ids(), vec![SubvolId(42)]);
    }
}
