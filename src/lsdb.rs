//! The link state database of a single level.
//!
//! The database is kept in a [`left_right`] map, so readers (the shortest path computation,
//! sequence number PDU generation, users inspecting the database) never block the flooding
//! logic. Writes are serialized through a [`LsdbWriteGuard`].

use std::{
    collections::BTreeMap,
    ops::RangeInclusive,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::trace;

use crate::{
    level::Level,
    pdu::{self, tlv, Lsp, Pdu},
    sequence_number::SeqNo,
    system_id::LspId,
};

/// How long a purged LSP is kept after its lifetime reached 0, so the purge can be flooded.
pub const ZERO_AGE_LIFETIME: Duration = Duration::from_secs(60);

/// How an LSP compares to the copy in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The LSP is newer than our copy, or we don't have one.
    Newer,
    /// The LSP is the same instance as our copy.
    Same,
    /// Our copy is newer.
    Older,
}

/// An LSP stored in the database.
#[derive(Debug, Clone)]
pub struct LspEntry {
    lsp: Lsp,
    /// The LSP as received or originated, used for flooding.
    raw: Bytes,
    installed_at: Instant,
    /// When the remaining lifetime reaches 0. For purges, when the purge was installed.
    expires_at: Instant,
}

/// The link state database of a single level.
#[derive(Clone)]
pub struct Lsdb {
    level: Level,
    writer: Arc<Mutex<left_right::WriteHandle<LsdbInner, LsdbOplogEntry>>>,
    reader: left_right::ReadHandle<LsdbInner>,
}

#[derive(Default, Clone)]
struct LsdbInner {
    lsps: BTreeMap<LspId, Arc<LspEntry>>,
}

/// Operations allowed on the left_right for the database.
enum LsdbOplogEntry {
    /// Insert or replace an LSP.
    Upsert(Arc<LspEntry>),
    /// Remove an LSP.
    Remove(LspId),
}

/// Exclusive write access to the database. Every change is published immediately, so it is
/// visible to readers and later calls on this guard alike.
pub struct LsdbWriteGuard<'a> {
    level: Level,
    writer: MutexGuard<'a, left_right::WriteHandle<LsdbInner, LsdbOplogEntry>>,
}

impl LspEntry {
    /// Create a new entry from an LSP and its encoding.
    pub fn new(lsp: Lsp, raw: Bytes, now: Instant) -> Self {
        let expires_at = now + Duration::from_secs(lsp.remaining_lifetime as u64);
        Self {
            lsp,
            raw,
            installed_at: now,
            expires_at,
        }
    }

    /// Create a new entry from an LSP, encoding it.
    pub fn from_lsp(lsp: Lsp, now: Instant) -> Self {
        let raw = Pdu::Lsp(lsp.clone()).encode().freeze();
        Self::new(lsp, raw, now)
    }

    /// The decoded LSP, with the lifetime it had when installed.
    pub fn lsp(&self) -> &Lsp {
        &self.lsp
    }

    /// The id of the LSP.
    pub fn lsp_id(&self) -> LspId {
        self.lsp.lsp_id
    }

    /// The sequence number of the LSP.
    pub fn seqno(&self) -> SeqNo {
        self.lsp.seqno
    }

    /// The checksum of the LSP.
    pub fn checksum(&self) -> u16 {
        self.lsp.checksum
    }

    /// Checks if the LSP is a purge.
    pub fn is_purge(&self) -> bool {
        self.lsp.is_purge()
    }

    /// When the LSP was installed.
    pub fn installed_at(&self) -> Instant {
        self.installed_at
    }

    /// The remaining lifetime of the LSP at the given time, in seconds.
    pub fn remaining_lifetime(&self, now: Instant) -> u16 {
        if self.is_purge() {
            return 0;
        }
        let remaining = self.expires_at.saturating_duration_since(now);
        // Round up, so an LSP only reports 0 once it actually expired.
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        secs.min(u16::MAX as u64) as u16
    }

    /// Checks if the lifetime of a regular LSP ran out, so it must be purged.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_purge() && now >= self.expires_at
    }

    /// Checks if a purge was held long enough and can be removed from the database.
    pub fn is_removable(&self, now: Instant) -> bool {
        self.is_purge() && now >= self.expires_at + ZERO_AGE_LIFETIME
    }

    /// The summary of this LSP for sequence number PDUs, with its current lifetime.
    pub fn entry(&self, now: Instant) -> tlv::LspEntry {
        tlv::LspEntry {
            remaining_lifetime: self.remaining_lifetime(now),
            ..self.lsp.entry()
        }
    }

    /// The encoded LSP as it has to be flooded at the given time.
    pub fn encode(&self, now: Instant) -> Bytes {
        if self.is_purge() {
            return self.raw.clone();
        }
        let mut buf = BytesMut::from(&self.raw[..]);
        pdu::set_remaining_lifetime(&mut buf, self.remaining_lifetime(now));
        buf.freeze()
    }

    /// Turn this expired LSP into a purge with the same identifier and sequence number.
    pub fn to_purge(&self, tlvs: Vec<pdu::Tlv>, now: Instant) -> LspEntry {
        LspEntry::from_lsp(self.lsp.to_purge(tlvs), now)
    }

    /// Compare a received LSP instance with this one.
    pub fn compare(&self, seqno: SeqNo, is_purge: bool) -> Freshness {
        match seqno.cmp(&self.seqno()) {
            std::cmp::Ordering::Greater => Freshness::Newer,
            std::cmp::Ordering::Less => Freshness::Older,
            std::cmp::Ordering::Equal => match (is_purge, self.is_purge()) {
                (true, false) => Freshness::Newer,
                (false, true) => Freshness::Older,
                _ => Freshness::Same,
            },
        }
    }
}

/// Compare a received LSP instance with our copy, if any.
pub fn freshness(stored: Option<&LspEntry>, seqno: SeqNo, is_purge: bool) -> Freshness {
    match stored {
        Some(entry) => entry.compare(seqno, is_purge),
        None => Freshness::Newer,
    }
}

impl Lsdb {
    /// Create a new empty database for the given level.
    pub fn new(level: Level) -> Self {
        let (writer, reader) = left_right::new();
        let writer = Arc::new(Mutex::new(writer));
        Lsdb {
            level,
            writer,
            reader,
        }
    }

    /// The level of this database.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Get an LSP.
    pub fn get(&self, lsp_id: &LspId) -> Option<Arc<LspEntry>> {
        self.reader
            .enter()
            .expect("Write handle is saved on the Lsdb, so this is always Some; qed")
            .lsps
            .get(lsp_id)
            .cloned()
    }

    /// All LSPs, in order of their id.
    pub fn entries(&self) -> Vec<Arc<LspEntry>> {
        self.reader
            .enter()
            .expect("Write handle is saved on the Lsdb, so this is always Some; qed")
            .lsps
            .values()
            .cloned()
            .collect()
    }

    /// The LSPs in the given range of ids.
    pub fn range(&self, range: RangeInclusive<LspId>) -> Vec<Arc<LspEntry>> {
        self.reader
            .enter()
            .expect("Write handle is saved on the Lsdb, so this is always Some; qed")
            .lsps
            .range(range)
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    /// Amount of LSPs in the database, purges included.
    pub fn len(&self) -> usize {
        self.reader
            .enter()
            .expect("Write handle is saved on the Lsdb, so this is always Some; qed")
            .lsps
            .len()
    }

    /// Checks if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the database for writing. While the returned guard is held, other writers block.
    pub fn write(&self) -> LsdbWriteGuard<'_> {
        LsdbWriteGuard {
            level: self.level,
            writer: self.writer.lock().unwrap(),
        }
    }
}

impl LsdbWriteGuard<'_> {
    /// Get an LSP.
    pub fn get(&self, lsp_id: &LspId) -> Option<Arc<LspEntry>> {
        self.writer
            .enter()
            .expect("Write handle is alive while the guard is held; qed")
            .lsps
            .get(lsp_id)
            .cloned()
    }

    /// Insert an LSP, replacing the existing instance. The new instance must not be older than
    /// the existing one.
    pub fn insert(&mut self, entry: LspEntry) -> Arc<LspEntry> {
        trace!(level = %self.level, lsp_id = %entry.lsp_id(), seqno = %entry.seqno(), "Installing LSP");
        let entry = Arc::new(entry);
        self.writer
            .append(LsdbOplogEntry::Upsert(Arc::clone(&entry)));
        self.writer.publish();
        entry
    }

    /// Remove an LSP.
    pub fn remove(&mut self, lsp_id: LspId) {
        trace!(level = %self.level, %lsp_id, "Removing LSP");
        self.writer.append(LsdbOplogEntry::Remove(lsp_id));
        self.writer.publish();
    }

    /// Replace every LSP whose lifetime ran out with a purge, and remove purges which were held
    /// long enough.
    pub fn age(&mut self, now: Instant) -> Aged {
        let (expired, removed) = {
            let guard = self
                .writer
                .enter()
                .expect("Write handle is alive while the guard is held; qed");
            let expired = guard
                .lsps
                .values()
                .filter(|e| e.is_expired(now))
                .cloned()
                .collect::<Vec<_>>();
            let removed = guard
                .lsps
                .values()
                .filter(|e| e.is_removable(now))
                .map(|e| e.lsp_id())
                .collect::<Vec<_>>();
            (expired, removed)
        };

        for lsp_id in &removed {
            self.writer.append(LsdbOplogEntry::Remove(*lsp_id));
        }
        let purged = expired
            .into_iter()
            .map(|e| {
                trace!(level = %self.level, lsp_id = %e.lsp_id(), "LSP lifetime expired");
                let purge = Arc::new(e.to_purge(Vec::new(), now));
                self.writer
                    .append(LsdbOplogEntry::Upsert(Arc::clone(&purge)));
                purge
            })
            .collect();
        self.writer.publish();
        Aged { purged, removed }
    }
}

/// Result of aging the database.
#[derive(Debug, Default)]
pub struct Aged {
    /// LSPs whose lifetime ran out, replaced by a purge which needs to be flooded.
    pub purged: Vec<Arc<LspEntry>>,
    /// Purges removed after being held for [`ZERO_AGE_LIFETIME`].
    pub removed: Vec<LspId>,
}

impl left_right::Absorb<LsdbOplogEntry> for LsdbInner {
    fn absorb_first(&mut self, operation: &mut LsdbOplogEntry, _: &Self) {
        match operation {
            LsdbOplogEntry::Upsert(entry) => self.upsert(Arc::clone(entry)),
            LsdbOplogEntry::Remove(lsp_id) => {
                self.lsps.remove(lsp_id);
            }
        }
    }

    fn sync_with(&mut self, first: &Self) {
        self.lsps = first.lsps.clone();
    }

    fn absorb_second(&mut self, operation: LsdbOplogEntry, _: &Self) {
        match operation {
            LsdbOplogEntry::Upsert(entry) => self.upsert(entry),
            LsdbOplogEntry::Remove(lsp_id) => {
                self.lsps.remove(&lsp_id);
            }
        }
    }
}

impl LsdbInner {
    fn upsert(&mut self, entry: Arc<LspEntry>) {
        if let Some(existing) = self.lsps.get(&entry.lsp_id()) {
            debug_assert!(
                existing.seqno() <= entry.seqno(),
                "Replacing LSP {} with an older instance",
                entry.lsp_id()
            );
            if existing.seqno() > entry.seqno() {
                return;
            }
        }
        self.lsps.insert(entry.lsp_id(), entry);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{freshness, Freshness, Lsdb, LspEntry, ZERO_AGE_LIFETIME};
    use crate::{
        level::{Level, LevelType},
        pdu::{self, Lsp, LspFlags, Pdu},
        sequence_number::SeqNo,
        system_id::{LanId, LspId, SystemId},
    };

    fn lsp(last: u8, seqno: u32, lifetime: u16) -> Lsp {
        Lsp::new(
            Level::L2,
            LspId::new(LanId::router(SystemId::new([0, 0, 0, 0, 0, last])), 0),
            SeqNo::new(seqno),
            lifetime,
            LspFlags::new(LevelType::Level2),
            vec![pdu::Tlv::Hostname(format!("r{last}"))],
        )
    }

    #[test]
    fn insert_and_read() {
        let now = Instant::now();
        let lsdb = Lsdb::new(Level::L2);
        assert!(lsdb.is_empty());

        let mut guard = lsdb.write();
        guard.insert(LspEntry::from_lsp(lsp(2, 1, 1200), now));
        guard.insert(LspEntry::from_lsp(lsp(1, 1, 1200), now));
        // Visible through the guard before it is dropped.
        assert!(guard.get(&lsp(1, 1, 1200).lsp_id).is_some());
        drop(guard);

        assert_eq!(lsdb.len(), 2);
        let ids = lsdb
            .entries()
            .iter()
            .map(|e| e.lsp_id().system_id())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                SystemId::new([0, 0, 0, 0, 0, 1]),
                SystemId::new([0, 0, 0, 0, 0, 2])
            ]
        );

        lsdb.write().insert(LspEntry::from_lsp(lsp(1, 2, 1200), now));
        let entry = lsdb.get(&lsp(1, 1, 1200).lsp_id).expect("LSP was inserted; qed");
        assert_eq!(entry.seqno(), SeqNo::new(2));
    }

    #[test]
    fn compare_instances() {
        let now = Instant::now();
        let stored = LspEntry::from_lsp(lsp(1, 5, 1200), now);
        assert_eq!(stored.compare(SeqNo::new(6), false), Freshness::Newer);
        assert_eq!(stored.compare(SeqNo::new(5), false), Freshness::Same);
        assert_eq!(stored.compare(SeqNo::new(4), false), Freshness::Older);
        // A purge wins over the same instance.
        assert_eq!(stored.compare(SeqNo::new(5), true), Freshness::Newer);

        let purged = LspEntry::from_lsp(lsp(1, 5, 0), now);
        assert_eq!(purged.compare(SeqNo::new(5), false), Freshness::Older);
        assert_eq!(purged.compare(SeqNo::new(5), true), Freshness::Same);

        assert_eq!(freshness(None, SeqNo::new(1), false), Freshness::Newer);
    }

    #[test]
    fn lifetime_counts_down() {
        let now = Instant::now();
        let entry = LspEntry::from_lsp(lsp(1, 1, 100), now);
        assert_eq!(entry.remaining_lifetime(now), 100);
        assert_eq!(entry.remaining_lifetime(now + Duration::from_millis(500)), 100);
        assert_eq!(entry.remaining_lifetime(now + Duration::from_secs(40)), 60);
        assert!(!entry.is_expired(now + Duration::from_secs(99)));
        assert!(entry.is_expired(now + Duration::from_secs(100)));

        let later = now + Duration::from_secs(40);
        let encoded = entry.encode(later);
        let Pdu::Lsp(decoded) = pdu::decode(&encoded).expect("Patched LSP is valid; qed") else {
            panic!("Encoded an LSP");
        };
        assert_eq!(decoded.remaining_lifetime, 60);
        assert_eq!(decoded.checksum, entry.checksum());
        assert_eq!(entry.entry(later).remaining_lifetime, 60);
    }

    #[test]
    fn aging_purges_then_removes() {
        let now = Instant::now();
        let lsdb = Lsdb::new(Level::L2);
        lsdb.write().insert(LspEntry::from_lsp(lsp(1, 3, 10), now));
        lsdb.write().insert(LspEntry::from_lsp(lsp(2, 1, 1200), now));

        assert!(lsdb.write().age(now + Duration::from_secs(5)).purged.is_empty());

        let expired_at = now + Duration::from_secs(10);
        let purges = lsdb.write().age(expired_at).purged;
        assert_eq!(purges.len(), 1);
        assert!(purges[0].is_purge());
        assert_eq!(purges[0].seqno(), SeqNo::new(3));
        assert_eq!(lsdb.len(), 2);

        // Held for the zero age lifetime.
        let aged = lsdb
            .write()
            .age(expired_at + ZERO_AGE_LIFETIME - Duration::from_secs(1));
        assert!(aged.purged.is_empty());
        assert!(aged.removed.is_empty());
        assert_eq!(lsdb.len(), 2);
        let aged = lsdb.write().age(expired_at + ZERO_AGE_LIFETIME);
        assert_eq!(aged.removed, vec![purges[0].lsp_id()]);
        assert_eq!(lsdb.len(), 1);
    }

    #[test]
    fn range_selects_ids() {
        let now = Instant::now();
        let lsdb = Lsdb::new(Level::L2);
        for last in 1..=5 {
            lsdb.write().insert(LspEntry::from_lsp(lsp(last, 1, 1200), now));
        }
        let start = lsp(2, 1, 1200).lsp_id;
        let end = lsp(4, 1, 1200).lsp_id;
        assert_eq!(lsdb.range(start..=end).len(), 3);
        assert_eq!(lsdb.range(LspId::MIN..=LspId::MAX).len(), 5);
    }

    #[test]
    fn clones_share_state() {
        let now = Instant::now();
        let lsdb = Lsdb::new(Level::L1);
        let other = lsdb.clone();
        lsdb.write().insert(LspEntry::from_lsp(lsp(1, 1, 1200), now));
        assert_eq!(other.len(), 1);
    }
}
