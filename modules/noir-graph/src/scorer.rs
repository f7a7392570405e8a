use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use noir_common::{EvidenceChain, RelationTaxonomy, RoleClass};

use crate::aggregator::CandidateEvidence;

/// A chain together with what it contributes to its candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChain {
    pub chain: EvidenceChain,
    pub contribution: f64,
    /// Role of the first hop; `None` when the chain contributes nothing.
    pub role: Option<RoleClass>,
}

impl ScoredChain {
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.chain.latest_date()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub entity_id: String,
    /// Best contribution first, see [`compare_contributions`].
    pub chains: Vec<ScoredChain>,
    pub score: f64,
    pub role: Option<RoleClass>,
}

impl ScoredCandidate {
    /// The winning chain, when any chain carries weight.
    pub fn winner(&self) -> Option<&ScoredChain> {
        self.chains.first().filter(|c| c.contribution > 0.0)
    }

    pub fn is_implicated(&self) -> bool {
        self.score > 0.0
    }
}

/// Turns chains into contributions using the relation taxonomy.
///
/// A direct edge contributes its weight; a longer chain contributes the
/// product of its hop weights. A candidate's score is its best contribution.
/// Contributions are never summed.
#[derive(Clone)]
pub struct CulpabilityScorer {
    taxonomy: Arc<RelationTaxonomy>,
}

impl CulpabilityScorer {
    pub fn new(taxonomy: Arc<RelationTaxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &RelationTaxonomy {
        &self.taxonomy
    }

    pub fn chain_score(&self, chain: &EvidenceChain) -> f64 {
        chain
            .hops()
            .iter()
            .map(|h| self.taxonomy.weight(&h.relation))
            .product::<f64>()
            .clamp(0.0, 1.0)
    }

    pub fn chain_role(&self, chain: &EvidenceChain) -> Option<RoleClass> {
        chain
            .hops()
            .first()
            .and_then(|h| self.taxonomy.role(&h.relation))
    }

    pub fn score_chain(&self, chain: &EvidenceChain) -> ScoredChain {
        let contribution = self.chain_score(chain);
        let role = if contribution > 0.0 {
            self.chain_role(chain)
        } else {
            None
        };
        ScoredChain {
            chain: chain.clone(),
            contribution,
            role,
        }
    }

    pub fn score_candidate(&self, candidate: &CandidateEvidence) -> ScoredCandidate {
        let mut chains: Vec<ScoredChain> = candidate
            .chains
            .iter()
            .map(|c| self.score_chain(c))
            .collect();
        chains.sort_by(compare_contributions);

        let (score, role) = chains
            .first()
            .filter(|c| c.contribution > 0.0)
            .map(|c| (c.contribution, c.role))
            .unwrap_or((0.0, None));

        ScoredCandidate {
            entity_id: candidate.entity_id.clone(),
            chains,
            score,
            role,
        }
    }

    pub fn score_all(&self, candidates: &[CandidateEvidence]) -> Vec<ScoredCandidate> {
        candidates.iter().map(|c| self.score_candidate(c)).collect()
    }
}

fn severity(role: Option<RoleClass>) -> i16 {
    role.map(|r| r.severity() as i16).unwrap_or(-1)
}

/// Orders contributions best first: higher contribution, more severe role,
/// more recent date (dated before undated), shorter chain, then rendering.
pub fn compare_contributions(a: &ScoredChain, b: &ScoredChain) -> Ordering {
    b.contribution
        .total_cmp(&a.contribution)
        .then_with(|| severity(b.role).cmp(&severity(a.role)))
        .then_with(|| b.latest_date().cmp(&a.latest_date()))
        .then_with(|| a.chain.len().cmp(&b.chain.len()))
        .then_with(|| a.chain.render().cmp(&b.chain.render()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use noir_common::RelationInstance;

    fn scorer() -> CulpabilityScorer {
        CulpabilityScorer::new(Arc::new(RelationTaxonomy::builtin()))
    }

    fn chain(hops: &[(&str, &str, &str)]) -> EvidenceChain {
        EvidenceChain::from_hops(
            hops.iter()
                .map(|(s, r, t)| RelationInstance::new(*s, *r, *t))
                .collect(),
        )
        .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn direct_edge_scores_its_weight() {
        let s = scorer();
        let c = chain(&[("Orlando Anderson", "SHOT_AT", "Tupac Shakur")]);
        assert!(approx(s.chain_score(&c), 0.99));
        assert_eq!(s.chain_role(&c), Some(RoleClass::Executor));
    }

    #[test]
    fn chain_score_is_product_and_bounded_by_weakest_hop() {
        let s = scorer();
        let c = chain(&[
            ("Puff Daddy", "HIRED_HITMAN", "Keffe D"),
            ("Keffe D", "ORDERED_HIT", "Orlando Anderson"),
            ("Orlando Anderson", "SHOT_AT", "Tupac Shakur"),
        ]);
        let score = s.chain_score(&c);
        assert!(approx(score, 0.95 * 0.95 * 0.99));
        assert!(score <= 0.95);
        assert_eq!(s.chain_role(&c), Some(RoleClass::Mastermind));
    }

    #[test]
    fn unknown_hop_zeroes_chain() {
        let s = scorer();
        let c = chain(&[
            ("Suge Knight", "WAS_IN_VEGAS", "Las Vegas"),
            ("Las Vegas", "SHOT_AT", "Tupac Shakur"),
        ]);
        let scored = s.score_chain(&c);
        assert_eq!(scored.contribution, 0.0);
        assert_eq!(scored.role, None);
    }

    #[test]
    fn score_is_max_never_sum() {
        let s = scorer();
        let candidate = CandidateEvidence {
            entity_id: "Puff Daddy".into(),
            chains: vec![
                chain(&[("Puff Daddy", "BEEF_WITH", "Tupac Shakur")]),
                chain(&[("Puff Daddy", "ORDERED_HIT_ON", "Tupac Shakur")]),
                chain(&[
                    ("Puff Daddy", "HIRED_HITMAN", "Keffe D"),
                    ("Keffe D", "ORCHESTRATED_MURDER_OF", "Tupac Shakur"),
                ]),
            ],
        };
        let scored = s.score_candidate(&candidate);
        assert!(approx(scored.score, 0.95));
        assert_eq!(scored.role, Some(RoleClass::Mastermind));
        assert_eq!(scored.chains[0].chain.first_hop().relation, "ORDERED_HIT_ON");
    }

    #[test]
    fn ties_prefer_dated_evidence() {
        let s = scorer();
        let dated = EvidenceChain::direct(
            RelationInstance::new("Orlando Anderson", "SHOT_AT", "Tupac Shakur")
                .with_attr("date", "1996-09-07"),
        );
        let candidate = CandidateEvidence {
            entity_id: "Orlando Anderson".into(),
            chains: vec![
                chain(&[("Orlando Anderson", "KILLED", "Tupac Shakur")]),
                dated.clone(),
            ],
        };
        let scored = s.score_candidate(&candidate);
        assert_eq!(scored.winner().map(|w| &w.chain), Some(&dated));
    }

    #[test]
    fn ties_prefer_severity_then_shorter() {
        let builtin = RelationTaxonomy::builtin();
        let taxonomy = RelationTaxonomy::from_entries(
            builtin
                .iter()
                .map(|(l, e)| (l.to_string(), e.role, e.weight))
                .chain([
                    ("PAID".to_string(), RoleClass::Accomplice, 0.95),
                    ("BANKROLLED".to_string(), RoleClass::Mastermind, 1.0),
                ]),
        )
        .unwrap();
        let s = CulpabilityScorer::new(Arc::new(taxonomy));

        let candidate = CandidateEvidence {
            entity_id: "X".into(),
            chains: vec![
                chain(&[("X", "PAID", "T")]),
                chain(&[("X", "BANKROLLED", "Y"), ("Y", "ORDERED_HIT_ON", "T")]),
                chain(&[("X", "ORDERED_HIT_ON", "T")]),
            ],
        };
        let scored = s.score_candidate(&candidate);
        assert_eq!(scored.role, Some(RoleClass::Mastermind));
        assert_eq!(scored.chains[0].chain.render(), "X -[:ORDERED_HIT_ON]-> T");
        assert_eq!(scored.chains[1].chain.first_hop().relation, "BANKROLLED");
        assert_eq!(scored.chains[2].chain.first_hop().relation, "PAID");
    }

    #[test]
    fn zero_candidates_have_no_role() {
        let s = scorer();
        let candidate = CandidateEvidence {
            entity_id: "White Cadillac".into(),
            chains: vec![chain(&[("White Cadillac", "USED_IN", "Tupac Shooting")])],
        };
        let scored = s.score_candidate(&candidate);
        assert!(!scored.is_implicated());
        assert!(scored.winner().is_none());
        assert_eq!(scored.role, None);
    }
}
