use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use noir_common::{EvidenceChain, RelationInstance};

use crate::retriever::RawEvidence;

/// Every distinct chain implicating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvidence {
    pub entity_id: String,
    pub chains: Vec<EvidenceChain>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedEvidence {
    /// Candidates ordered by id, chains within a candidate ordered by rendering.
    pub candidates: Vec<CandidateEvidence>,
    /// Chains starting at an entity that is itself under investigation.
    pub excluded: Vec<EvidenceChain>,
    /// Outgoing relations of secondary suspects that do not reach the target.
    pub surfaces: BTreeMap<String, Vec<RelationInstance>>,
}

impl AggregatedEvidence {
    pub fn chain_count(&self) -> usize {
        self.candidates.iter().map(|c| c.chains.len()).sum::<usize>() + self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain_count() == 0
    }
}

/// Merge, deduplicate and group raw query results by implicated candidate.
///
/// Direct-in and entity-out relations that land on a target are the same kind
/// of evidence and collapse into one set of direct chains. Entity-out relations
/// that land elsewhere only feed the secondary surfaces.
pub fn aggregate(raw: &RawEvidence, targets: &[String]) -> AggregatedEvidence {
    let is_target = |id: &str| targets.iter().any(|t| t == id);

    let direct = raw
        .direct
        .iter()
        .chain(raw.outgoing.iter().filter(|r| is_target(&r.target)))
        .cloned()
        .map(EvidenceChain::direct);
    let multi = raw.chains.iter().filter(|c| is_target(c.target())).cloned();

    let mut chains: Vec<EvidenceChain> = Vec::new();
    for chain in direct.chain(multi) {
        if !chains.iter().any(|kept| kept.same_evidence(&chain)) {
            chains.push(chain);
        }
    }
    chains.sort_by(compare_chains);

    let mut grouped: BTreeMap<String, Vec<EvidenceChain>> = BTreeMap::new();
    let mut excluded = Vec::new();
    for chain in chains {
        if is_target(chain.suspect()) {
            excluded.push(chain);
        } else {
            grouped
                .entry(chain.suspect().to_string())
                .or_default()
                .push(chain);
        }
    }

    let mut surfaces: BTreeMap<String, Vec<RelationInstance>> = BTreeMap::new();
    for rel in raw.outgoing.iter().filter(|r| !is_target(&r.target)) {
        let surface = surfaces.entry(rel.source.clone()).or_default();
        if !surface.iter().any(|kept| kept.same_evidence(rel)) {
            surface.push(rel.clone());
        }
    }
    for surface in surfaces.values_mut() {
        surface.sort_by(|a, b| {
            a.to_string()
                .cmp(&b.to_string())
                .then_with(|| a.attributes.cmp(&b.attributes))
                .then_with(|| a.handle.cmp(&b.handle))
        });
    }

    AggregatedEvidence {
        candidates: grouped
            .into_iter()
            .map(|(entity_id, chains)| CandidateEvidence { entity_id, chains })
            .collect(),
        excluded,
        surfaces,
    }
}

/// Total order over chains: rendering, then per-hop attributes and handles.
fn compare_chains(a: &EvidenceChain, b: &EvidenceChain) -> Ordering {
    a.render().cmp(&b.render()).then_with(|| {
        let ka = a.hops().iter().map(|h| (&h.attributes, &h.handle));
        let kb = b.hops().iter().map(|h| (&h.attributes, &h.handle));
        ka.cmp(kb)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str, r: &str, t: &str) -> RelationInstance {
        RelationInstance::new(s, r, t)
    }

    fn targets() -> Vec<String> {
        vec!["Tupac Shakur".to_string()]
    }

    #[test]
    fn direct_in_and_entity_out_merge() {
        let raw = RawEvidence {
            direct: vec![rel("Puff Daddy", "ORDERED_HIT_ON", "Tupac Shakur")],
            outgoing: vec![
                rel("Puff Daddy", "ORDERED_HIT_ON", "Tupac Shakur"),
                rel("Puff Daddy", "FOUNDED", "Bad Boy Records"),
            ],
            ..RawEvidence::default()
        };
        let agg = aggregate(&raw, &targets());
        assert_eq!(agg.candidates.len(), 1);
        assert_eq!(agg.candidates[0].chains.len(), 1);
        assert_eq!(agg.surfaces["Puff Daddy"].len(), 1);
        assert_eq!(agg.surfaces["Puff Daddy"][0].target, "Bad Boy Records");
    }

    #[test]
    fn same_edge_with_different_attributes_is_kept_twice() {
        let raw = RawEvidence {
            direct: vec![
                rel("Orlando Anderson", "SHOT_AT", "Tupac Shakur").with_attr("date", "1996-09-07"),
                rel("Orlando Anderson", "SHOT_AT", "Tupac Shakur").with_attr("date", "1996-09-08"),
                rel("Orlando Anderson", "SHOT_AT", "Tupac Shakur").with_attr("date", "1996-09-07"),
            ],
            ..RawEvidence::default()
        };
        let agg = aggregate(&raw, &targets());
        assert_eq!(agg.candidates[0].chains.len(), 2);
    }

    #[test]
    fn targets_are_not_candidates() {
        let t = vec!["Tupac Shakur".to_string(), "Tupac Shooting".to_string()];
        let raw = RawEvidence {
            direct: vec![
                rel("Tupac Shakur", "VICTIM_OF", "Tupac Shooting"),
                rel("Suge Knight", "INJURED_IN", "Tupac Shooting"),
            ],
            ..RawEvidence::default()
        };
        let agg = aggregate(&raw, &t);
        assert_eq!(agg.excluded.len(), 1);
        assert_eq!(agg.candidates.len(), 1);
        assert_eq!(agg.candidates[0].entity_id, "Suge Knight");
        assert_eq!(agg.chain_count(), 2);
    }

    #[test]
    fn groups_are_sorted() {
        let chain = EvidenceChain::from_hops(vec![
            rel("Keffe D", "ORDERED_HIT", "Orlando Anderson"),
            rel("Orlando Anderson", "SHOT_AT", "Tupac Shakur"),
        ])
        .unwrap();
        let raw = RawEvidence {
            direct: vec![
                rel("Puff Daddy", "ORDERED_HIT_ON", "Tupac Shakur"),
                rel("Keffe D", "ORCHESTRATED_MURDER_OF", "Tupac Shakur"),
            ],
            chains: vec![chain],
            ..RawEvidence::default()
        };
        let agg = aggregate(&raw, &targets());
        let ids: Vec<&str> = agg.candidates.iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["Keffe D", "Puff Daddy"]);
        let keffe: Vec<String> = agg.candidates[0].chains.iter().map(|c| c.render()).collect();
        assert_eq!(
            keffe,
            vec![
                "Keffe D -[:ORCHESTRATED_MURDER_OF]-> Tupac Shakur".to_string(),
                "Keffe D -[:ORDERED_HIT]-> Orlando Anderson -[:SHOT_AT]-> Tupac Shakur".to_string(),
            ]
        );
    }
}
