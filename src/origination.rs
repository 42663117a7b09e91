//! Origination of our own LSPs.
//!
//! The LSPs we originate are derived from the current state of the router: the circuits, their
//! adjacencies and the designated router elections. Every time this state might have changed the
//! desired LSPs are rebuilt and compared with the copies in the database. Only LSPs whose content
//! changed get a new sequence number, LSPs we no longer need are purged.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    circuit::{Circuit, Medium},
    level::{Level, LevelType},
    lsdb::LspEntry,
    metric::Metric,
    metrics::Metrics,
    pdu::{
        tlv::{Authentication, IpReach, IsReach, NLPID_IPV4},
        Lsp, LspFlags, PduType, Tlv, ORIGINATING_BUFFER_SIZE,
    },
    sequence_number::SeqNo,
    system_id::{LanId, LspId, SystemId},
    Config, Router,
};

/// State of the originator, shared by all levels.
#[derive(Debug)]
pub(crate) struct Originator {
    /// Set the overload bit in our LSPs.
    pub overload: bool,
}

/// The content of a node we advertise, before it is split in fragments.
#[derive(Debug, Default, PartialEq, Eq)]
struct Content {
    /// TLVs which go in fragment 0.
    header: Vec<Tlv>,
    is_reach: Vec<IsReach>,
    ip_reach: Vec<IpReach>,
}

impl Originator {
    pub(crate) fn new(overload: bool) -> Self {
        Self { overload }
    }
}

/// The authentication TLV to include in PDUs of the given level, if any.
pub(crate) fn auth_tlv(config: &Config, level: Level) -> Option<Tlv> {
    config
        .password(level)
        .map(|password| Tlv::Authentication(Authentication::cleartext(password)))
}

/// The IS type bits we advertise.
fn is_type(config: &Config) -> LevelType {
    match config.level_type {
        LevelType::Level1 => LevelType::Level1,
        _ => LevelType::Level12,
    }
}

/// The content of our router LSP on the given level.
fn router_content<'a>(
    config: &Config,
    level: Level,
    circuits: impl IntoIterator<Item = &'a Circuit>,
) -> Content {
    let mut header = vec![
        Tlv::AreaAddresses(config.area_addresses.clone()),
        Tlv::ProtocolsSupported(vec![NLPID_IPV4]),
    ];
    if let Some(hostname) = &config.hostname {
        header.push(Tlv::Hostname(hostname.clone()));
    }

    let mut is_reach = Vec::new();
    let mut prefixes: BTreeMap<Ipv4Net, Metric> = BTreeMap::new();
    let mut interface_addresses = Vec::new();
    for circuit in circuits {
        if !circuit.has_level(level) || !circuit.is_enabled() {
            continue;
        }
        let metric = circuit.metric();
        for prefix in &circuit.config().prefixes {
            interface_addresses.push(prefix.addr());
            prefixes
                .entry(prefix.trunc())
                .and_modify(|m| *m = (*m).min(metric))
                .or_insert(metric);
        }
        match circuit.config().medium {
            Medium::PointToPoint => is_reach.extend(
                circuit
                    .up_neighbors(level)
                    .into_iter()
                    .map(|neighbor| IsReach::new(LanId::router(neighbor), metric)),
            ),
            Medium::Broadcast => {
                if circuit.is_up(level) {
                    if let Some(lan_id) = circuit.dis(level).lan_id {
                        is_reach.push(IsReach::new(lan_id, metric));
                    }
                }
            }
        }
    }
    if !interface_addresses.is_empty() {
        header.push(Tlv::Ipv4InterfaceAddresses(interface_addresses));
    }

    Content {
        header,
        is_reach,
        ip_reach: prefixes
            .into_iter()
            .map(|(prefix, metric)| IpReach::new(prefix, metric))
            .collect(),
    }
}

/// The content of the pseudonode LSP of a broadcast circuit on which we are the designated
/// router: every `Up` neighbor, and ourselves, at metric 0.
fn pseudonode_content(own: SystemId, mut neighbors: Vec<SystemId>) -> Content {
    neighbors.push(own);
    neighbors.sort();
    neighbors.dedup();
    Content {
        header: Vec::new(),
        is_reach: neighbors
            .into_iter()
            .map(|n| IsReach::new(LanId::router(n), Metric::ZERO))
            .collect(),
        ip_reach: Vec::new(),
    }
}

/// Split content into fragments which, together with the authentication TLV, fit in
/// [`ORIGINATING_BUFFER_SIZE`]. Fragment 0 is always present.
fn fragment(level: Level, content: Content, auth: Option<&Tlv>) -> Vec<Vec<Tlv>> {
    let budget = ORIGINATING_BUFFER_SIZE
        - PduType::Lsp(level).header_size()
        - auth.map(Tlv::wire_size).unwrap_or(0);

    let mut fragments = Vec::new();
    let mut current = Fragment::new(content.header);
    for reach in content.is_reach {
        current.is_reach.push(reach);
        if current.size() > budget && current.len() > 1 {
            let reach = current.is_reach.pop();
            fragments.push(current.finish(auth));
            current = Fragment::new(Vec::new());
            current.is_reach.extend(reach);
        }
    }
    for reach in content.ip_reach {
        current.ip_reach.push(reach);
        if current.size() > budget && current.len() > 1 {
            let reach = current.ip_reach.pop();
            fragments.push(current.finish(auth));
            current = Fragment::new(Vec::new());
            current.ip_reach.extend(reach);
        }
    }
    fragments.push(current.finish(auth));

    if fragments.len() > u8::MAX as usize + 1 {
        warn!(fragments = fragments.len(), "Too much content to advertise, truncating");
        fragments.truncate(u8::MAX as usize + 1);
    }
    fragments
}

/// A fragment being filled.
struct Fragment {
    header: Vec<Tlv>,
    is_reach: Vec<IsReach>,
    ip_reach: Vec<IpReach>,
}

impl Fragment {
    fn new(header: Vec<Tlv>) -> Self {
        Self {
            header,
            is_reach: Vec::new(),
            ip_reach: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.header.len() + self.is_reach.len() + self.ip_reach.len()
    }

    fn size(&self) -> usize {
        let mut size = self.header.iter().map(Tlv::wire_size).sum::<usize>();
        if !self.is_reach.is_empty() {
            size += Tlv::ExtIsReach(self.is_reach.clone()).wire_size();
        }
        if !self.ip_reach.is_empty() {
            size += Tlv::ExtIpReach(self.ip_reach.clone()).wire_size();
        }
        size
    }

    fn finish(self, auth: Option<&Tlv>) -> Vec<Tlv> {
        let mut tlvs = Vec::with_capacity(self.header.len() + 3);
        tlvs.extend(auth.cloned());
        tlvs.extend(self.header);
        if !self.is_reach.is_empty() {
            tlvs.push(Tlv::ExtIsReach(self.is_reach));
        }
        if !self.ip_reach.is_empty() {
            tlvs.push(Tlv::ExtIpReach(self.ip_reach));
        }
        tlvs
    }
}

impl<M> Router<M>
where
    M: Metrics + Clone + Send + 'static,
{
    /// The LSPs we want to have in the database of the given level, with their flags and TLVs.
    fn desired_lsps(&self, level: Level, overload: bool) -> BTreeMap<LspId, (LspFlags, Vec<Tlv>)> {
        let own = self.config.system_id;
        let auth = auth_tlv(&self.config, level);
        let is_type = is_type(&self.config);

        let attached = level == Level::L1
            && self.config.level_type == LevelType::Level12
            && self.circuits.values().any(|c| c.is_up(Level::L2));
        let flags = LspFlags::new(is_type)
            .with_overload(overload)
            .with_attached(attached);

        let mut desired = BTreeMap::new();
        let content = router_content(&self.config, level, self.circuits.values());
        for (i, tlvs) in fragment(level, content, auth.as_ref()).into_iter().enumerate() {
            desired.insert(LspId::new(LanId::router(own), i as u8), (flags, tlvs));
        }

        for circuit in self.circuits.values() {
            if circuit.config().medium != Medium::Broadcast || !circuit.has_level(level) {
                continue;
            }
            let dis = circuit.dis(level);
            if dis.elected != Some(own) {
                continue;
            }
            let Some(lan_id) = dis.lan_id else {
                continue;
            };
            let content = pseudonode_content(own, circuit.up_neighbors(level));
            for (i, tlvs) in fragment(level, content, auth.as_ref()).into_iter().enumerate() {
                desired.insert(LspId::new(lan_id, i as u8), (LspFlags::new(is_type), tlvs));
            }
        }

        desired
    }

    /// Bring our own LSPs on the given level in line with the current state of the router. With
    /// `refresh` set every LSP is reissued, even if its content didn't change.
    pub(crate) fn originate(&self, level: Level, refresh: bool) {
        if !self.config.level_type.contains(level) {
            return;
        }
        let now = Instant::now();
        let originator = self.originator.lock().unwrap();
        let desired = self.desired_lsps(level, originator.overload);
        let own = self.config.system_id;
        let lifetime = self.config.timers.lsp_lifetime;
        let lsdb = self.lsdb(level);

        let mut flood = Vec::new();
        let mut topology_changed = false;
        {
            let mut db = lsdb.write();
            for (lsp_id, (flags, tlvs)) in &desired {
                let stored = db.get(lsp_id);
                let seqno = match &stored {
                    None => SeqNo::INITIAL,
                    Some(s)
                        if !refresh
                            && !s.is_purge()
                            && s.lsp().flags == *flags
                            && s.lsp().tlvs == *tlvs =>
                    {
                        continue
                    }
                    // Wrapped, the purge has to age out before we can start over.
                    Some(s) if s.is_purge() && s.seqno() == SeqNo::MAX => continue,
                    Some(s) => match s.seqno().next() {
                        Some(seqno) => seqno,
                        None => {
                            warn!(%level, %lsp_id, "Sequence number space exhausted, purging LSP before restarting");
                            let purge = s.to_purge(auth_tlv(&self.config, level).into_iter().collect(), now);
                            flood.push(db.insert(purge));
                            self.metrics.lsp_purged(level);
                            topology_changed = true;
                            continue;
                        }
                    },
                };

                let lsp = Lsp::new(level, *lsp_id, seqno, lifetime, *flags, tlvs.clone());
                topology_changed |= stored.as_ref().map_or(true, |s| !s.lsp().same_content(&lsp));
                debug!(%level, %lsp_id, %seqno, "Originating LSP");
                flood.push(db.insert(LspEntry::from_lsp(lsp, now)));
                self.metrics.lsp_originated(level);
            }

            let own_lsps = LspId::new(LanId::new(own, 0), 0)
                ..=LspId::new(LanId::new(own, u8::MAX), u8::MAX);
            for stored in lsdb.range(own_lsps) {
                if stored.is_purge() || desired.contains_key(&stored.lsp_id()) {
                    continue;
                }
                debug!(%level, lsp_id = %stored.lsp_id(), "Purging LSP we no longer originate");
                let purge = stored.to_purge(auth_tlv(&self.config, level).into_iter().collect(), now);
                flood.push(db.insert(purge));
                self.metrics.lsp_purged(level);
                topology_changed = true;
            }
        }
        drop(originator);

        for entry in flood {
            self.flood(level, &entry, None, now);
        }
        if topology_changed {
            self.schedule_spf(level);
        }
    }

    /// Set or clear the overload bit in our LSPs.
    pub fn set_overload(&self, overload: bool) {
        {
            let mut originator = self.originator.lock().unwrap();
            if originator.overload == overload {
                return;
            }
            originator.overload = overload;
        }
        debug!(overload, "Overload bit changed");
        for level in self.config.level_type.levels() {
            self.originate(level, false);
        }
    }

    /// Checks if the overload bit is set in our LSPs.
    pub fn overload(&self) -> bool {
        self.originator.lock().unwrap().overload
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnet::Ipv4Net;

    use super::{fragment, pseudonode_content, router_content, Content};
    use crate::{
        circuit::{Circuit, CircuitConfig, CircuitId, Medium},
        level::Level,
        metric::Metric,
        pdu::{
            tlv::{Authentication, IpReach, IsReach, TlvsExt},
            Lsp, LspFlags, Pdu, Tlv, ORIGINATING_BUFFER_SIZE,
        },
        sequence_number::SeqNo,
        system_id::{LanId, LspId, SystemId},
        Config,
    };

    fn config() -> Config {
        let mut config = Config::new(
            SystemId::new([0, 0, 0, 0, 0, 1]),
            "49.0001".parse().expect("Valid area; qed"),
        );
        config.hostname = Some("r1".into());
        config
    }

    #[test]
    fn router_content_without_adjacencies() {
        let mut circuit = CircuitConfig::new(CircuitId::new(1), Medium::PointToPoint);
        circuit.prefixes = vec!["10.0.0.1/24".parse().expect("Valid prefix; qed")];
        circuit.metric = 7;
        let config = config();
        let circuits = [Circuit::new(circuit, config.level_type)];

        let content = router_content(&config, Level::L2, circuits.iter());
        assert!(content.is_reach.is_empty());
        assert_eq!(content.ip_reach.len(), 1);
        assert_eq!(
            content.ip_reach[0].prefix(),
            "10.0.0.0/24".parse::<Ipv4Net>().expect("Valid prefix; qed")
        );
        assert_eq!(content.ip_reach[0].metric(), Metric::new(7));
        assert_eq!(content.header.hostname(), Some("r1"));
        assert_eq!(content.header.area_addresses().len(), 1);
    }

    #[test]
    fn pseudonode_lists_self() {
        let own = SystemId::new([0, 0, 0, 0, 0, 5]);
        let content = pseudonode_content(own, vec![SystemId::new([0, 0, 0, 0, 0, 9])]);
        let neighbors = content
            .is_reach
            .iter()
            .map(|r| (r.neighbor().system_id(), r.metric()))
            .collect::<Vec<_>>();
        assert_eq!(
            neighbors,
            vec![
                (own, Metric::ZERO),
                (SystemId::new([0, 0, 0, 0, 0, 9]), Metric::ZERO)
            ]
        );
    }

    #[test]
    fn small_content_fits_one_fragment() {
        let content = Content {
            header: vec![Tlv::Hostname("r1".into())],
            is_reach: vec![IsReach::new(
                LanId::router(SystemId::new([0, 0, 0, 0, 0, 2])),
                Metric::new(10),
            )],
            ip_reach: Vec::new(),
        };
        let auth = Tlv::Authentication(Authentication::cleartext("secret"));
        let fragments = fragment(Level::L1, content, Some(&auth));
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].authentication().is_some());
        assert_eq!(fragments[0].is_reach().len(), 1);
    }

    #[test]
    fn large_content_is_fragmented() {
        let content = Content {
            header: vec![Tlv::Hostname("r1".into())],
            is_reach: (0..200u32)
                .map(|i| {
                    let b = i.to_be_bytes();
                    IsReach::new(
                        LanId::router(SystemId::new([0, 0, 0, 0, b[2], b[3]])),
                        Metric::new(10),
                    )
                })
                .collect(),
            ip_reach: (0..300u32)
                .map(|i| {
                    IpReach::new(
                        Ipv4Net::new(Ipv4Addr::from(0x0a00_0000 + (i << 8)), 24)
                            .expect("Valid prefix; qed"),
                        Metric::new(1),
                    )
                })
                .collect(),
        };
        let auth = Tlv::Authentication(Authentication::cleartext("secret"));
        let fragments = fragment(Level::L2, content, Some(&auth));
        assert!(fragments.len() > 1);

        // Header only in fragment 0, auth everywhere, nothing lost.
        assert_eq!(fragments[0].hostname(), Some("r1"));
        assert!(fragments[1..].iter().all(|f| f.hostname().is_none()));
        assert!(fragments.iter().all(|f| f.authentication().is_some()));
        assert_eq!(
            fragments.iter().map(|f| f.is_reach().len()).sum::<usize>(),
            200
        );
        assert_eq!(
            fragments.iter().map(|f| f.ip_reach().len()).sum::<usize>(),
            300
        );

        for (i, tlvs) in fragments.into_iter().enumerate() {
            let lsp = Lsp::new(
                Level::L2,
                LspId::new(LanId::router(SystemId::new([0, 0, 0, 0, 0, 1])), i as u8),
                SeqNo::INITIAL,
                1200,
                LspFlags::from_bits(0x03),
                tlvs,
            );
            assert!(Pdu::Lsp(lsp).encode().len() <= ORIGINATING_BUFFER_SIZE);
        }
    }
}
