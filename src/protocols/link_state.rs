use std::collections::{BTreeMap, BTreeSet};

use crate::model::lsdb::{LinkStateDb, LsdbEntry};
use crate::model::messages::{LinkAttrs, LsaPacket};
use crate::model::state::LinkSnapshot;

/// Hop budget stamped on self-originated LSAs.
pub const LSA_TTL_HOPS: i64 = 8;
/// Remote LSDB entries older than this are purged.
pub const LSA_MAX_AGE_SECS: f64 = 120.0;

/// Outcome of running an inbound LSA through the acceptance rules.
#[derive(Debug, Clone, PartialEq)]
pub enum LsaDisposition {
    /// The packet claims to originate from this router.
    SelfOrigin,
    /// Sequence at or below the stored one; the LSDB is unchanged.
    Stale,
    /// Stored. `reflood` carries the TTL-decremented copy to forward,
    /// or None when the hop budget is exhausted.
    Stored { reflood: Option<LsaPacket> },
}

/// Origination and acceptance policy for this router's link-state domain:
/// owns the self LSA sequence counter, the local link snapshots, the
/// local prefix set and the LSDB.
#[derive(Debug)]
pub struct LinkStatePlane {
    router_id: String,
    lsa_seq: u64,
    local_links: BTreeMap<String, LinkSnapshot>,
    local_prefixes: BTreeSet<String>,
    lsdb: LinkStateDb,
}

impl LinkStatePlane {
    pub fn new(router_id: impl Into<String>, local_prefixes: BTreeSet<String>, now: f64) -> Self {
        let router_id = router_id.into();
        let lsdb = LinkStateDb::new(router_id.clone(), local_prefixes.clone(), now);
        Self {
            router_id,
            lsa_seq: 1,
            local_links: BTreeMap::new(),
            local_prefixes,
            lsdb,
        }
    }

    pub fn local_prefixes(&self) -> &BTreeSet<String> {
        &self.local_prefixes
    }

    pub fn lsdb(&self) -> &LinkStateDb {
        &self.lsdb
    }

    /// Record a fresh snapshot for a local link. An unusable snapshot
    /// (non-finite cost) removes the link instead: a local link exists
    /// only while the neighbor is up with a finite cost. Returns whether
    /// the change is material enough to republish the self LSA.
    pub fn update_local_link(&mut self, neighbor: &str, snapshot: LinkSnapshot) -> bool {
        if !snapshot.cost.is_finite() {
            return self.drop_local_link(neighbor);
        }
        let material = match self.local_links.get(neighbor) {
            Some(current) => current.materially_differs(&snapshot),
            None => true,
        };
        self.local_links.insert(neighbor.to_string(), snapshot);
        material
    }

    /// Remove the local link toward `neighbor`. Returns true when a link
    /// was actually present (removal is always material).
    pub fn drop_local_link(&mut self, neighbor: &str) -> bool {
        self.local_links.remove(neighbor).is_some()
    }

    /// Bump the sequence, rebuild the self LSDB entry from the live local
    /// links and prefixes, and return the LSA to flood.
    pub fn originate(&mut self, now: f64) -> LsaPacket {
        self.lsa_seq += 1;
        self.lsdb.replace_self(
            self.lsa_seq,
            self.local_links.clone(),
            self.local_prefixes.clone(),
            now,
        );
        self.self_lsa()
    }

    /// The current self LSA with a fresh hop budget, without bumping the
    /// sequence. Used for the initial flood at startup.
    pub fn self_lsa(&self) -> LsaPacket {
        LsaPacket {
            origin: self.router_id.clone(),
            seq: self.lsa_seq,
            ttl: LSA_TTL_HOPS,
            prefixes: self.local_prefixes.clone(),
            links: self
                .local_links
                .iter()
                .map(|(neighbor, snapshot)| {
                    (neighbor.clone(), LinkAttrs::from_snapshot(snapshot))
                })
                .collect(),
        }
    }

    /// Acceptance rules for an inbound LSA, in order: self-origin is
    /// discarded; a sequence at or below the stored one is discarded;
    /// otherwise the entry is replaced atomically and the packet is
    /// re-flooded with ttl - 1 unless the budget ran out.
    pub fn accept(&mut self, packet: &LsaPacket, now: f64) -> LsaDisposition {
        if packet.origin == self.router_id {
            return LsaDisposition::SelfOrigin;
        }

        let entry = LsdbEntry {
            seq: packet.seq,
            links: packet
                .links
                .iter()
                .map(|(neighbor, attrs)| (neighbor.clone(), attrs.clone().into_snapshot(now)))
                .collect(),
            prefixes: packet.prefixes.clone(),
            received_at: now,
        };
        if !self.lsdb.upsert(&packet.origin, entry) {
            return LsaDisposition::Stale;
        }

        let ttl = packet.ttl - 1;
        let reflood = (ttl > 0).then(|| LsaPacket {
            ttl,
            ..packet.clone()
        });
        LsaDisposition::Stored { reflood }
    }

    /// Purge remote LSDB entries past the max age. Returns the purged
    /// origins; a non-empty result warrants an SPF run.
    pub fn age_out(&mut self, now: f64) -> Vec<String> {
        self.lsdb.age_out(now, LSA_MAX_AGE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::state::QoSSample;

    fn snapshot(cost: f64) -> LinkSnapshot {
        LinkSnapshot {
            cost,
            sample: QoSSample {
                latency_ms: 5.0,
                jitter_ms: 0.5,
                loss_percent: 0.0,
                bandwidth_mbps: Some(100.0),
            },
            updated_at: 0.0,
        }
    }

    fn inbound(origin: &str, seq: u64, ttl: i64) -> LsaPacket {
        LsaPacket {
            origin: origin.to_string(),
            seq,
            ttl,
            prefixes: BTreeSet::from(["10.0.5.0/24".to_string()]),
            links: BTreeMap::from([(
                "r1".to_string(),
                LinkAttrs {
                    cost: Some(3.0),
                    latency_ms: Some(5.0),
                    jitter_ms: Some(0.5),
                    loss_percent: Some(0.0),
                    bandwidth_mbps: None,
                },
            )]),
        }
    }

    #[test]
    fn originate_bumps_sequence_and_rewrites_self_entry() {
        let mut plane = LinkStatePlane::new(
            "r1",
            BTreeSet::from(["10.0.1.0/24".to_string()]),
            0.0,
        );
        assert!(plane.update_local_link("r2", snapshot(4.0)));

        let lsa = plane.originate(1.0);
        assert_eq!(lsa.seq, 2);
        assert_eq!(lsa.ttl, LSA_TTL_HOPS);
        assert!(lsa.links.contains_key("r2"));
        assert!(lsa.prefixes.contains("10.0.1.0/24"));
        assert_eq!(plane.lsdb().self_entry().seq, 2);

        let again = plane.originate(2.0);
        assert_eq!(again.seq, 3);
    }

    #[test]
    fn minor_remeasurement_is_not_material() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        assert!(plane.update_local_link("r2", snapshot(4.0)));
        assert!(!plane.update_local_link("r2", snapshot(4.2)));
        assert!(plane.update_local_link("r2", snapshot(6.0)));
    }

    #[test]
    fn unusable_cost_removes_the_local_link() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        assert!(plane.update_local_link("r2", snapshot(4.0)));
        assert!(plane.update_local_link("r2", snapshot(f64::INFINITY)));
        assert!(plane.self_lsa().links.is_empty());
        // Removing an already absent link changes nothing.
        assert!(!plane.update_local_link("r2", snapshot(f64::INFINITY)));
    }

    #[test]
    fn self_origin_packets_are_discarded() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        let verdict = plane.accept(&inbound("r1", 99, 8), 0.0);
        assert_eq!(verdict, LsaDisposition::SelfOrigin);
        assert_eq!(plane.lsdb().self_entry().seq, 1);
    }

    #[test]
    fn duplicate_sequence_is_stale() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        assert!(matches!(
            plane.accept(&inbound("r2", 5, 8), 0.0),
            LsaDisposition::Stored { .. }
        ));
        assert_eq!(plane.accept(&inbound("r2", 5, 8), 1.0), LsaDisposition::Stale);
        assert_eq!(plane.accept(&inbound("r2", 4, 8), 1.0), LsaDisposition::Stale);
    }

    #[test]
    fn newer_sequence_replaces_and_refloods_with_decremented_ttl() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        plane.accept(&inbound("r2", 5, 8), 0.0);

        let verdict = plane.accept(&inbound("r2", 6, 8), 1.0);
        let LsaDisposition::Stored { reflood } = verdict else {
            panic!("expected the newer sequence to be stored");
        };
        let reflood = reflood.expect("hop budget allows re-flooding");
        assert_eq!(reflood.ttl, 7);
        assert_eq!(reflood.seq, 6);
        assert_eq!(plane.lsdb().get("r2").expect("entry").seq, 6);
    }

    #[test]
    fn ttl_one_is_stored_but_not_reflooded() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        let verdict = plane.accept(&inbound("r2", 1, 1), 0.0);
        assert_eq!(verdict, LsaDisposition::Stored { reflood: None });
        assert!(plane.lsdb().get("r2").is_some());
    }

    #[test]
    fn aging_triggers_only_for_remote_entries() {
        let mut plane = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        plane.accept(&inbound("r2", 1, 8), 10.0);
        assert!(plane.age_out(100.0).is_empty());
        assert_eq!(plane.age_out(131.0), vec!["r2".to_string()]);
        assert!(plane.lsdb().get("r1").is_some());
    }

    #[test]
    fn replaying_packets_in_order_is_idempotent() {
        let packets = [
            inbound("r2", 1, 8),
            inbound("r2", 2, 8),
            inbound("r3", 1, 8),
            inbound("r2", 2, 8),
            inbound("r2", 1, 8),
        ];

        let mut once = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        for packet in &packets {
            once.accept(packet, 0.0);
        }
        let mut twice = LinkStatePlane::new("r1", BTreeSet::new(), 0.0);
        for packet in packets.iter().chain(packets.iter()) {
            twice.accept(packet, 0.0);
        }

        assert_eq!(once.lsdb().get("r2").expect("entry").seq, 2);
        assert_eq!(twice.lsdb().get("r2").expect("entry").seq, 2);
        assert_eq!(once.lsdb().get("r3").expect("entry").seq, 1);
        assert_eq!(twice.lsdb().get("r3").expect("entry").seq, 1);
    }
}
