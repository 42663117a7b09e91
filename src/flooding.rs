//! Reliable flooding of LSPs, and synchronization of link state databases with sequence number
//! PDUs.

use std::{collections::BTreeSet, sync::Arc};

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{
    circuit::{Circuit, Destination, Medium},
    error::PduError,
    level::Level,
    lsdb::{freshness, Freshness, LspEntry},
    metrics::Metrics,
    origination::auth_tlv,
    pdu::{
        tlv::{self, TlvsExt},
        Csnp, Lsp, Pdu, PduType, Psnp, Tlv, ORIGINATING_BUFFER_SIZE,
    },
    sequence_number::SeqNo,
    system_id::{LanId, LspId},
    Router,
};

/// Size of an LSP entry in an LSP entries TLV.
const LSP_ENTRY_SIZE: usize = 16;
/// Size of the type and length fields of a TLV.
const TLV_HEADER_SIZE: usize = 2;

/// Amount of LSP entries which fit in a single sequence number PDU with the given header size
/// and optional authentication TLV.
fn entries_per_pdu(header_size: usize, auth: Option<&Tlv>) -> usize {
    let budget = ORIGINATING_BUFFER_SIZE - header_size - auth.map(Tlv::wire_size).unwrap_or(0);
    let per_tlv = tlv::MAX_TLV_VALUE_SIZE / LSP_ENTRY_SIZE;
    let full_tlv = TLV_HEADER_SIZE + per_tlv * LSP_ENTRY_SIZE;
    (budget / full_tlv) * per_tlv
        + (budget % full_tlv).saturating_sub(TLV_HEADER_SIZE) / LSP_ENTRY_SIZE
}

fn snp_tlvs(auth: Option<&Tlv>, entries: Vec<tlv::LspEntry>) -> Vec<Tlv> {
    let mut tlvs = Vec::with_capacity(2);
    tlvs.extend(auth.cloned());
    if !entries.is_empty() {
        tlvs.push(Tlv::LspEntries(entries));
    }
    tlvs
}

/// Build the CSNPs describing the complete database. The ranges of consecutive CSNPs connect, the
/// first one starts at [`LspId::MIN`] and the last one ends at [`LspId::MAX`].
pub(crate) fn build_csnps(
    level: Level,
    source: LanId,
    entries: Vec<tlv::LspEntry>,
    auth: Option<&Tlv>,
) -> Vec<Csnp> {
    let per = entries_per_pdu(PduType::Csnp(level).header_size(), auth).max(1);
    let chunks = entries.chunks(per).collect::<Vec<_>>();
    if chunks.is_empty() {
        return vec![Csnp {
            level,
            source,
            start: LspId::MIN,
            end: LspId::MAX,
            tlvs: snp_tlvs(auth, Vec::new()),
        }];
    }

    let mut csnps = Vec::with_capacity(chunks.len());
    let mut start = LspId::MIN;
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let end = if i == last {
            LspId::MAX
        } else {
            chunk[chunk.len() - 1].lsp_id
        };
        csnps.push(Csnp {
            level,
            source,
            start,
            end,
            tlvs: snp_tlvs(auth, chunk.to_vec()),
        });
        match end.successor() {
            Some(next) => start = next,
            None => break,
        }
    }
    csnps
}

/// Build the PSNPs carrying the given entries.
pub(crate) fn build_psnps(
    level: Level,
    source: LanId,
    entries: Vec<tlv::LspEntry>,
    auth: Option<&Tlv>,
) -> Vec<Psnp> {
    let per = entries_per_pdu(PduType::Psnp(level).header_size(), auth).max(1);
    entries
        .chunks(per)
        .map(|chunk| Psnp {
            level,
            source,
            tlvs: snp_tlvs(auth, chunk.to_vec()),
        })
        .collect()
}

impl<M> Router<M>
where
    M: Metrics + Clone + Send + 'static,
{
    /// Checks the authentication TLV of an LSP or sequence number PDU.
    fn authenticate(&self, level: Level, tlvs: &[Tlv]) -> Result<(), PduError> {
        match self.config.password(level) {
            None => Ok(()),
            Some(password) => match tlvs.authentication() {
                Some(auth) if auth.matches(password) => Ok(()),
                _ => Err(PduError::AuthenticationFailure),
            },
        }
    }

    /// Checks that the circuit takes part in flooding on the level.
    fn check_flooding(&self, circuit: &Circuit, level: Level) -> Result<(), PduError> {
        if !circuit.has_level(level) {
            return Err(PduError::LevelMismatch);
        }
        let state = circuit.lock();
        if !state.is_enabled() {
            return Err(PduError::CircuitDisabled(circuit.id()));
        }
        if state.up_neighbors(level).is_empty() {
            return Err(PduError::NoAdjacency);
        }
        Ok(())
    }

    /// Checks that the sender of a sequence number PDU is an `Up` neighbor.
    fn check_neighbor(&self, circuit: &Circuit, level: Level, source: LanId) -> Result<(), PduError> {
        if !circuit.has_level(level) {
            return Err(PduError::LevelMismatch);
        }
        let state = circuit.lock();
        if !state.is_enabled() {
            return Err(PduError::CircuitDisabled(circuit.id()));
        }
        if !state.up_neighbors(level).contains(&source.system_id()) {
            return Err(PduError::NoAdjacency);
        }
        Ok(())
    }

    /// Where PDUs of the given level go on the circuit.
    fn destination(circuit: &Circuit, level: Level) -> Destination {
        match circuit.config().medium {
            Medium::Broadcast => Destination::all_is(level),
            Medium::PointToPoint => Destination::PointToPoint,
        }
    }

    /// Handle a received LSP.
    pub(crate) fn process_lsp(&self, circuit: &Circuit, lsp: Lsp) -> Result<(), PduError> {
        let level = lsp.level;
        self.check_flooding(circuit, level)?;
        self.authenticate(level, &lsp.tlvs)?;

        let now = Instant::now();
        let lsp_id = lsp.lsp_id;
        let own = lsp_id.system_id() == self.config.system_id;
        let lsdb = self.lsdb(level);
        let mut db = lsdb.write();
        let stored = db.get(&lsp_id);
        match freshness(stored.as_deref(), lsp.seqno, lsp.is_purge()) {
            Freshness::Newer => {
                let topology_changed = stored
                    .as_ref()
                    .map_or(true, |s| !s.lsp().same_content(&lsp));
                let is_purge = lsp.is_purge();
                let entry = db.insert(LspEntry::from_lsp(lsp, now));
                drop(db);

                debug!(%level, %lsp_id, seqno = %entry.seqno(), purge = is_purge, circuit = %circuit.id(), "Installed newer LSP");
                if is_purge {
                    self.metrics.lsp_purged(level);
                } else {
                    self.metrics.lsp_installed(level);
                }

                if circuit.config().medium == Medium::PointToPoint {
                    self.send_psnps(circuit, level, vec![entry.entry(now)]);
                }
                self.flood(level, &entry, Some(circuit), now);
                if own {
                    // Someone has a copy of our LSP we don't agree with, reissue or purge it.
                    self.originate(level, false);
                }
                if topology_changed {
                    self.schedule_spf(level);
                }
            }
            Freshness::Same => {
                drop(db);
                trace!(%level, %lsp_id, circuit = %circuit.id(), "Received duplicate LSP");
                if circuit.config().medium == Medium::PointToPoint {
                    circuit.lock().acknowledge(level, lsp_id, lsp.seqno);
                    if let Some(stored) = stored {
                        self.send_psnps(circuit, level, vec![stored.entry(now)]);
                    }
                }
            }
            Freshness::Older => {
                drop(db);
                if let Some(stored) = stored {
                    trace!(%level, %lsp_id, circuit = %circuit.id(), "Received older LSP, sending ours");
                    self.send_lsp(circuit, level, &stored, now);
                }
            }
        }
        Ok(())
    }

    /// Handle a received CSNP.
    pub(crate) fn process_csnp(&self, circuit: &Circuit, csnp: Csnp) -> Result<(), PduError> {
        let level = csnp.level;
        self.check_neighbor(circuit, level, csnp.source)?;
        self.authenticate(level, &csnp.tlvs)?;

        let now = Instant::now();
        let lsdb = self.lsdb(level);
        let mut listed = BTreeSet::new();
        let mut request = Vec::new();
        let mut send = Vec::new();
        let mut acknowledged = Vec::new();
        for entry in csnp.tlvs.lsp_entries() {
            listed.insert(entry.lsp_id);
            let stored = lsdb.get(&entry.lsp_id);
            let purge = entry.remaining_lifetime == 0;
            match freshness(stored.as_deref(), entry.seqno, purge) {
                // No point in asking for a purge of an LSP we don't have.
                Freshness::Newer if stored.is_none() && purge => {}
                Freshness::Newer => request.push(request_entry(entry.lsp_id, stored.as_deref(), now)),
                Freshness::Older => send.extend(stored),
                Freshness::Same => acknowledged.push((entry.lsp_id, entry.seqno)),
            }
        }

        // LSPs in the described range the neighbor doesn't know about.
        if csnp.start <= csnp.end {
            send.extend(
                lsdb.range(csnp.start..=csnp.end)
                    .into_iter()
                    .filter(|e| !listed.contains(&e.lsp_id()) && !e.is_purge()),
            );
        }

        if circuit.config().medium == Medium::PointToPoint {
            let mut state = circuit.lock();
            for (lsp_id, seqno) in acknowledged {
                state.acknowledge(level, lsp_id, seqno);
            }
        }
        trace!(%level, circuit = %circuit.id(), requests = request.len(), sends = send.len(), "Processed CSNP");
        for entry in send {
            self.send_lsp(circuit, level, &entry, now);
        }
        if !request.is_empty() {
            self.send_psnps(circuit, level, request);
        }
        Ok(())
    }

    /// Handle a received PSNP.
    pub(crate) fn process_psnp(&self, circuit: &Circuit, psnp: Psnp) -> Result<(), PduError> {
        let level = psnp.level;
        self.check_neighbor(circuit, level, psnp.source)?;
        self.authenticate(level, &psnp.tlvs)?;

        // On a LAN only the designated router answers requests.
        let broadcast = circuit.config().medium == Medium::Broadcast;
        if broadcast && circuit.dis(level).elected != Some(self.config.system_id) {
            return Ok(());
        }

        let now = Instant::now();
        let lsdb = self.lsdb(level);
        let mut request = Vec::new();
        let mut send = Vec::new();
        let mut acknowledged = Vec::new();
        for entry in psnp.tlvs.lsp_entries() {
            let stored = lsdb.get(&entry.lsp_id);
            let purge = entry.remaining_lifetime == 0 && !entry.seqno.is_unknown();
            match (freshness(stored.as_deref(), entry.seqno, purge), stored) {
                (Freshness::Same, Some(_)) => acknowledged.push((entry.lsp_id, entry.seqno)),
                (Freshness::Older, Some(stored)) => send.push(stored),
                (Freshness::Newer, stored) if !(stored.is_none() && purge) => {
                    request.push(request_entry(entry.lsp_id, stored.as_deref(), now))
                }
                _ => {}
            }
        }

        if !broadcast {
            let mut state = circuit.lock();
            for (lsp_id, seqno) in acknowledged {
                state.acknowledge(level, lsp_id, seqno);
            }
        }
        for entry in send {
            self.send_lsp(circuit, level, &entry, now);
        }
        if !request.is_empty() {
            self.send_psnps(circuit, level, request);
        }
        Ok(())
    }

    /// Send an LSP on every circuit of the level with an `Up` adjacency, except the one it was
    /// received on.
    pub(crate) fn flood(
        &self,
        level: Level,
        entry: &Arc<LspEntry>,
        except: Option<&Circuit>,
        now: Instant,
    ) {
        let except = except.map(Circuit::id);
        for circuit in self.circuits.values() {
            if Some(circuit.id()) == except || !circuit.has_level(level) {
                continue;
            }
            self.send_lsp(circuit, level, entry, now);
        }
    }

    /// Send an LSP on a single circuit, if it has an `Up` adjacency on the level. On
    /// point-to-point circuits the LSP is retransmitted until acknowledged.
    pub(crate) fn send_lsp(&self, circuit: &Circuit, level: Level, entry: &LspEntry, now: Instant) {
        {
            let mut state = circuit.lock();
            if state.up_neighbors(level).is_empty() {
                return;
            }
            state.track_retransmit(level, entry.lsp_id(), entry.seqno());
        }
        self.send(
            circuit.id(),
            Self::destination(circuit, level),
            entry.encode(now),
        );
    }

    /// Send PSNPs with the given entries on a circuit.
    fn send_psnps(&self, circuit: &Circuit, level: Level, entries: Vec<tlv::LspEntry>) {
        let source = LanId::new(self.config.system_id, 0);
        let auth = auth_tlv(&self.config, level);
        for psnp in build_psnps(level, source, entries, auth.as_ref()) {
            self.send(
                circuit.id(),
                Self::destination(circuit, level),
                Pdu::Psnp(psnp).encode().freeze(),
            );
        }
    }

    /// Send CSNPs describing the complete database of the level on a circuit.
    pub(crate) fn send_csnps(&self, circuit: &Circuit, level: Level) {
        if !circuit.has_level(level) || !circuit.is_enabled() {
            return;
        }
        let now = Instant::now();
        let entries = self
            .lsdb(level)
            .entries()
            .iter()
            .map(|e| e.entry(now))
            .collect();
        let source = LanId::new(self.config.system_id, 0);
        let auth = auth_tlv(&self.config, level);
        for csnp in build_csnps(level, source, entries, auth.as_ref()) {
            self.send(
                circuit.id(),
                Self::destination(circuit, level),
                Pdu::Csnp(csnp).encode().freeze(),
            );
        }
    }

    /// Send CSNPs on every broadcast circuit on which we are the designated router.
    pub fn send_periodic_csnps(&self) {
        for circuit in self.circuits.values() {
            if circuit.config().medium != Medium::Broadcast {
                continue;
            }
            for level in Level::ALL {
                if circuit.dis(level).elected == Some(self.config.system_id) {
                    self.send_csnps(circuit, level);
                }
            }
        }
    }

    /// Resend LSPs which were not acknowledged on point-to-point circuits.
    pub fn retransmit(&self) {
        let now = Instant::now();
        for circuit in self.circuits.values() {
            let pending = circuit.lock().pending_retransmits();
            for (level, lsp_id) in pending {
                match self.lsdb(level).get(&lsp_id) {
                    Some(entry) => {
                        trace!(%level, %lsp_id, circuit = %circuit.id(), "Retransmitting LSP");
                        self.send_lsp(circuit, level, &entry, now);
                    }
                    None => {
                        circuit.lock().acknowledge(level, lsp_id, SeqNo::MAX);
                    }
                }
            }
        }
    }
}

/// The entry to put in a PSNP to request an LSP from a neighbor.
fn request_entry(lsp_id: LspId, stored: Option<&LspEntry>, now: Instant) -> tlv::LspEntry {
    match stored {
        Some(stored) => stored.entry(now),
        None => tlv::LspEntry {
            remaining_lifetime: 0,
            lsp_id,
            seqno: SeqNo::new(0),
            checksum: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{build_csnps, build_psnps, entries_per_pdu};
    use crate::{
        level::Level,
        pdu::{
            self,
            tlv::{Authentication, LspEntry, TlvsExt},
            Pdu, PduType, Tlv, ORIGINATING_BUFFER_SIZE,
        },
        sequence_number::SeqNo,
        system_id::{LanId, LspId, SystemId},
    };

    fn entries(n: u32) -> Vec<LspEntry> {
        (0..n)
            .map(|i| {
                let b = i.to_be_bytes();
                LspEntry {
                    remaining_lifetime: 1200,
                    lsp_id: LspId::new(
                        LanId::router(SystemId::new([0, 0, b[0], b[1], b[2], b[3]])),
                        0,
                    ),
                    seqno: SeqNo::new(i + 1),
                    checksum: 0x1234,
                }
            })
            .collect()
    }

    #[test]
    fn entries_per_pdu_fills_buffer() {
        assert_eq!(entries_per_pdu(PduType::Csnp(Level::L1).header_size(), None), 90);
        let auth = Tlv::Authentication(Authentication::cleartext("secret"));
        assert!(entries_per_pdu(PduType::Csnp(Level::L1).header_size(), Some(&auth)) < 90);
    }

    #[test]
    fn empty_database_single_csnp() {
        let source = LanId::new(SystemId::new([0, 0, 0, 0, 0, 1]), 0);
        let csnps = build_csnps(Level::L2, source, Vec::new(), None);
        assert_eq!(csnps.len(), 1);
        assert_eq!(csnps[0].start, LspId::MIN);
        assert_eq!(csnps[0].end, LspId::MAX);
        assert!(csnps[0].tlvs.lsp_entries().is_empty());
    }

    #[test]
    fn csnp_ranges_connect() {
        let source = LanId::new(SystemId::new([0, 0, 0, 0, 0, 1]), 0);
        let auth = Tlv::Authentication(Authentication::cleartext("secret"));
        let csnps = build_csnps(Level::L1, source, entries(250), Some(&auth));
        assert!(csnps.len() >= 3);
        assert_eq!(csnps[0].start, LspId::MIN);
        assert_eq!(csnps[csnps.len() - 1].end, LspId::MAX);
        for pair in csnps.windows(2) {
            assert_eq!(pair[0].end.successor(), Some(pair[1].start));
        }

        let mut total = 0;
        for csnp in &csnps {
            let listed = csnp.tlvs.lsp_entries();
            assert!(listed.iter().all(|e| csnp.covers(&e.lsp_id)));
            total += listed.len();

            let encoded = Pdu::Csnp(csnp.clone()).encode();
            assert!(encoded.len() <= ORIGINATING_BUFFER_SIZE);
            let Pdu::Csnp(decoded) = pdu::decode(&encoded).expect("CSNP decodes; qed") else {
                panic!("Decoded PDU is a CSNP");
            };
            assert_eq!(decoded.tlvs.lsp_entries(), listed);
            assert_eq!((decoded.start, decoded.end), (csnp.start, csnp.end));
        }
        assert_eq!(total, 250);
    }

    #[test]
    fn psnps_are_chunked() {
        let source = LanId::new(SystemId::new([0, 0, 0, 0, 0, 1]), 0);
        let psnps = build_psnps(Level::L2, source, entries(150), None);
        assert_eq!(psnps.len(), 2);
        for psnp in psnps {
            assert!(Pdu::Psnp(psnp).encode().len() <= ORIGINATING_BUFFER_SIZE);
        }
    }
}
