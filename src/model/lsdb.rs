use std::collections::{BTreeMap, BTreeSet};

use crate::model::state::LinkSnapshot;
use crate::protocols::spf::Graph;

/// One origin's advertised view: its link vector, its attached prefixes
/// and the sequence number that versions them.
#[derive(Debug, Clone)]
pub struct LsdbEntry {
    pub seq: u64,
    pub links: BTreeMap<String, LinkSnapshot>,
    pub prefixes: BTreeSet<String>,
    pub received_at: f64,
}

/// Origin-keyed link-state database. For any origin only the highest
/// sequence seen is retained; remote entries age out, the self entry
/// never does.
#[derive(Debug)]
pub struct LinkStateDb {
    self_id: String,
    entries: BTreeMap<String, LsdbEntry>,
}

impl LinkStateDb {
    pub fn new(self_id: impl Into<String>, local_prefixes: BTreeSet<String>, now: f64) -> Self {
        let self_id = self_id.into();
        let mut entries = BTreeMap::new();
        entries.insert(
            self_id.clone(),
            LsdbEntry {
                seq: 1,
                links: BTreeMap::new(),
                prefixes: local_prefixes,
                received_at: now,
            },
        );
        Self { self_id, entries }
    }

    /// Store a remote origin's entry. Entries carrying a sequence at or
    /// below the stored one are rejected, as is anything claiming to
    /// originate from this router.
    pub fn upsert(&mut self, origin: &str, entry: LsdbEntry) -> bool {
        if origin == self.self_id {
            return false;
        }
        if let Some(current) = self.entries.get(origin) {
            if entry.seq <= current.seq {
                return false;
            }
        }
        self.entries.insert(origin.to_string(), entry);
        true
    }

    pub fn replace_self(
        &mut self,
        seq: u64,
        links: BTreeMap<String, LinkSnapshot>,
        prefixes: BTreeSet<String>,
        now: f64,
    ) {
        self.entries.insert(
            self.self_id.clone(),
            LsdbEntry {
                seq,
                links,
                prefixes,
                received_at: now,
            },
        );
    }

    pub fn get(&self, origin: &str) -> Option<&LsdbEntry> {
        self.entries.get(origin)
    }

    pub fn self_entry(&self) -> &LsdbEntry {
        // Seeded at construction and only ever replaced, never removed.
        self.entries
            .get(&self.self_id)
            .expect("self entry is always present")
    }

    /// Drop remote entries older than `max_age`. Returns the purged
    /// origins.
    pub fn age_out(&mut self, now: f64, max_age: f64) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(origin, entry)| {
                origin.as_str() != self.self_id && now - entry.received_at > max_age
            })
            .map(|(origin, _)| origin.clone())
            .collect();
        for origin in &stale {
            self.entries.remove(origin);
        }
        stale
    }

    pub fn snapshot(&self) -> BTreeMap<String, LsdbEntry> {
        self.entries.clone()
    }
}

/// Directed weighted graph from an LSDB snapshot; only finite-cost links
/// become edges.
pub fn graph_from_entries(entries: &BTreeMap<String, LsdbEntry>) -> Graph {
    let mut graph: Graph = BTreeMap::new();
    for (origin, entry) in entries {
        let edges = entry
            .links
            .iter()
            .filter(|(_, snapshot)| snapshot.cost.is_finite())
            .map(|(neighbor, snapshot)| (neighbor.clone(), snapshot.cost))
            .collect();
        graph.insert(origin.clone(), edges);
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::state::QoSSample;

    fn link(cost: f64) -> LinkSnapshot {
        LinkSnapshot {
            cost,
            sample: QoSSample {
                latency_ms: 1.0,
                jitter_ms: 0.1,
                loss_percent: 0.0,
                bandwidth_mbps: None,
            },
            updated_at: 0.0,
        }
    }

    fn entry(seq: u64, links: &[(&str, f64)], received_at: f64) -> LsdbEntry {
        LsdbEntry {
            seq,
            links: links
                .iter()
                .map(|(id, cost)| (id.to_string(), link(*cost)))
                .collect(),
            prefixes: BTreeSet::new(),
            received_at,
        }
    }

    #[test]
    fn seeds_self_entry_with_sequence_one() {
        let db = LinkStateDb::new("r1", BTreeSet::from(["10.0.1.0/24".to_string()]), 0.0);
        let own = db.self_entry();
        assert_eq!(own.seq, 1);
        assert!(own.links.is_empty());
        assert!(own.prefixes.contains("10.0.1.0/24"));
    }

    #[test]
    fn stale_or_duplicate_sequence_never_changes_the_db() {
        let mut db = LinkStateDb::new("r1", BTreeSet::new(), 0.0);
        assert!(db.upsert("r2", entry(5, &[("r1", 1.0)], 1.0)));
        assert!(!db.upsert("r2", entry(5, &[("r1", 9.0)], 2.0)));
        assert!(!db.upsert("r2", entry(4, &[("r1", 9.0)], 2.0)));
        let stored = db.get("r2").expect("entry should exist");
        assert_eq!(stored.seq, 5);
        assert_eq!(stored.links["r1"].cost, 1.0);

        assert!(db.upsert("r2", entry(6, &[("r1", 9.0)], 3.0)));
        assert_eq!(db.get("r2").expect("entry should exist").seq, 6);
    }

    #[test]
    fn entries_claiming_self_origin_are_rejected() {
        let mut db = LinkStateDb::new("r1", BTreeSet::new(), 0.0);
        assert!(!db.upsert("r1", entry(99, &[("r2", 1.0)], 1.0)));
        assert_eq!(db.self_entry().seq, 1);
    }

    #[test]
    fn aging_purges_remote_entries_but_never_self() {
        let mut db = LinkStateDb::new("r1", BTreeSet::new(), 0.0);
        db.upsert("r2", entry(1, &[], 10.0));
        db.upsert("r3", entry(1, &[], 100.0));

        let purged = db.age_out(135.0, 120.0);
        assert_eq!(purged, vec!["r2".to_string()]);
        assert!(db.get("r2").is_none());
        assert!(db.get("r3").is_some());
        assert!(db.get("r1").is_some());

        let purged = db.age_out(1_000.0, 120.0);
        assert_eq!(purged, vec!["r3".to_string()]);
        assert!(db.get("r1").is_some());
    }

    #[test]
    fn graph_drops_infinite_cost_links() {
        let mut db = LinkStateDb::new("r1", BTreeSet::new(), 0.0);
        db.replace_self(
            2,
            BTreeMap::from([
                ("r2".to_string(), link(4.0)),
                ("r3".to_string(), link(f64::INFINITY)),
            ]),
            BTreeSet::new(),
            0.0,
        );
        db.upsert("r2", entry(1, &[("r1", 4.0)], 0.0));

        let graph = graph_from_entries(&db.snapshot());
        assert_eq!(graph["r1"].get("r2"), Some(&4.0));
        assert!(!graph["r1"].contains_key("r3"));
        assert_eq!(graph["r2"].get("r1"), Some(&4.0));
    }
}
