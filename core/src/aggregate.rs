// Result aggregator — merges the local repository's synchronous results
// with asynchronously arriving remote-peer results into one sectioned view.
//
// Remote peers answer in their own time, out of order, possibly more than
// once. The view never blocks on them: local results render immediately and
// each peer's contribution slots in as it arrives.

use std::collections::HashMap;

use crate::patient::PatientRecord;

/// One rendered section of the merged view
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSection {
    /// Section heading (e.g. "This device", "Peer abc123")
    pub title: String,
    pub records: Vec<PatientRecord>,
    pub is_local: bool,
}

/// A peer's most recent contribution
#[derive(Debug, Clone)]
struct RemoteEntry {
    records: Vec<PatientRecord>,
    /// Wire timestamp as reported by the peer
    timestamp: u64,
    /// Local arrival order; newest arrivals sort first
    arrival_seq: u64,
}

/// Merges local and remote search results
#[derive(Default)]
pub struct ResultAggregator {
    query: String,
    local: Vec<PatientRecord>,
    remote: HashMap<String, RemoteEntry>,
    arrival_counter: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new search: installs the query and drops all prior results
    pub fn begin_search(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.local.clear();
        self.remote.clear();
    }

    /// Clear the query and every accumulated result
    pub fn clear(&mut self) {
        self.query.clear();
        self.local.clear();
        self.remote.clear();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Install the local repository's results for the current query
    pub fn set_local_results(&mut self, records: Vec<PatientRecord>) {
        self.local = records;
    }

    /// Merge one peer's results. A new arrival from the same peer replaces,
    /// never appends to, that peer's prior entry.
    pub fn merge_remote(
        &mut self,
        peer_id: impl Into<String>,
        records: Vec<PatientRecord>,
        timestamp: u64,
    ) {
        self.arrival_counter += 1;
        self.remote.insert(
            peer_id.into(),
            RemoteEntry {
                records,
                timestamp,
                arrival_seq: self.arrival_counter,
            },
        );
    }

    /// Ordered view: one local section first (if non-empty), then one
    /// section per peer with non-empty results, most recent arrival first.
    pub fn sections(&self) -> Vec<ResultSection> {
        let mut sections = Vec::new();

        if !self.local.is_empty() {
            sections.push(ResultSection {
                title: "This device".to_string(),
                records: self.local.clone(),
                is_local: true,
            });
        }

        let mut peers: Vec<(&String, &RemoteEntry)> = self
            .remote
            .iter()
            .filter(|(_, entry)| !entry.records.is_empty())
            .collect();
        peers.sort_by(|a, b| b.1.arrival_seq.cmp(&a.1.arrival_seq));

        for (peer_id, entry) in peers {
            sections.push(ResultSection {
                title: format!("Peer {peer_id}"),
                records: entry.records.clone(),
                is_local: false,
            });
        }
        sections
    }

    /// Wire timestamp of a peer's current entry, if it has one
    pub fn remote_timestamp(&self, peer_id: &str) -> Option<u64> {
        self.remote.get(peer_id).map(|e| e.timestamp)
    }

    fn local_count(&self) -> usize {
        self.local.len()
    }

    fn remote_counts(&self) -> (usize, usize) {
        let peers = self
            .remote
            .values()
            .filter(|e| !e.records.is_empty())
            .count();
        let records = self.remote.values().map(|e| e.records.len()).sum();
        (records, peers)
    }

    /// Summary line for the current view, with correct singular/plural
    /// forms and distinct text for empty-query vs zero-result states.
    pub fn display_message(&self) -> String {
        if self.query.is_empty() {
            return "Enter a name to search patient records".to_string();
        }

        let local = self.local_count();
        let (remote, peers) = self.remote_counts();

        if local == 0 && remote == 0 {
            return format!("No patients found for \"{}\"", self.query);
        }

        let local_part = match local {
            0 => None,
            1 => Some("1 local patient".to_string()),
            n => Some(format!("{n} local patients")),
        };
        let remote_part = match remote {
            0 => None,
            n => Some(format!(
                "{n} from {peers} peer{}",
                if peers == 1 { "" } else { "s" }
            )),
        };

        let body = match (local_part, remote_part) {
            (Some(l), Some(r)) => format!("{l} and {r}"),
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => unreachable!(),
        };
        format!("Found {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(names: &[&str]) -> Vec<PatientRecord> {
        names.iter().map(|n| PatientRecord::new(*n)).collect()
    }

    #[test]
    fn test_local_section_comes_first() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.merge_remote("peer-1", records(&["Remote"]), 10);
        agg.set_local_results(records(&["Local"]));

        let sections = agg.sections();
        assert_eq!(sections.len(), 2);
        assert!(sections[0].is_local);
        assert_eq!(sections[0].records[0].name, "Local");
        assert!(!sections[1].is_local);
    }

    #[test]
    fn test_remote_sections_most_recent_arrival_first() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.merge_remote("peer-1", records(&["One"]), 100);
        agg.merge_remote("peer-2", records(&["Two"]), 50);

        let sections = agg.sections();
        // peer-2 arrived later, so it sorts first regardless of wire timestamp
        assert_eq!(sections[0].title, "Peer peer-2");
        assert_eq!(sections[1].title, "Peer peer-1");
    }

    #[test]
    fn test_second_response_replaces_peer_entry() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.merge_remote("peer-1", records(&["Old A", "Old B"]), 10);
        agg.merge_remote("peer-1", records(&["New"]), 20);

        let sections = agg.sections();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].records.len(), 1);
        assert_eq!(sections[0].records[0].name, "New");
        assert_eq!(agg.remote_timestamp("peer-1"), Some(20));
    }

    #[test]
    fn test_empty_peer_results_render_no_section() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.merge_remote("peer-1", Vec::new(), 10);
        assert!(agg.sections().is_empty());
    }

    #[test]
    fn test_new_search_drops_prior_results() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.set_local_results(records(&["Local"]));
        agg.merge_remote("peer-1", records(&["Remote"]), 10);

        agg.begin_search("b");
        assert!(agg.sections().is_empty());
        assert_eq!(agg.query(), "b");
    }

    #[test]
    fn test_display_message_mixed_counts() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("diallo");
        agg.set_local_results(records(&["A", "B"]));
        agg.merge_remote("peer-1", records(&["C", "D", "E"]), 10);

        let message = agg.display_message();
        assert!(message.contains("2 local patients"), "got: {message}");
        assert!(message.contains("3 from 1 peer"), "got: {message}");
    }

    #[test]
    fn test_display_message_singular_forms() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("x");
        agg.set_local_results(records(&["A"]));
        assert!(agg.display_message().contains("1 local patient"));
        assert!(!agg.display_message().contains("patients"));

        agg.merge_remote("peer-1", records(&["B"]), 1);
        agg.merge_remote("peer-2", records(&["C"]), 2);
        assert!(agg.display_message().contains("2 from 2 peers"));
    }

    #[test]
    fn test_display_message_empty_query_vs_no_results() {
        let mut agg = ResultAggregator::new();
        let idle = agg.display_message();

        agg.begin_search("nobody");
        let empty = agg.display_message();

        assert_ne!(idle, empty);
        assert!(empty.contains("nobody"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut agg = ResultAggregator::new();
        agg.begin_search("a");
        agg.set_local_results(records(&["Local"]));
        agg.merge_remote("peer-1", records(&["Remote"]), 10);

        agg.clear();
        assert!(agg.sections().is_empty());
        assert!(agg.query().is_empty());
    }
}
