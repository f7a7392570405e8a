use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use noir_common::{RelationInstance, RoleClass};

use crate::aggregator::AggregatedEvidence;
use crate::retriever::RawEvidence;
use crate::scorer::{CulpabilityScorer, ScoredCandidate, ScoredChain};
use crate::store::QueryShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    /// Evidence reached the target; suspects (possibly none) are ranked.
    Ranked,
    /// The target fragment matched no entity.
    NoSuchEntity,
    /// The target resolved but no relation reaches it.
    NoEvidence,
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleStatus::Ranked => write!(f, "ranked"),
            BundleStatus::NoSuchEntity => write!(f, "no_such_entity"),
            BundleStatus::NoEvidence => write!(f, "no_evidence"),
        }
    }
}

/// One chain as presented to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvidence {
    /// Entity ids in path order.
    pub path: Vec<String>,
    /// Relation types in path order.
    pub relations: Vec<String>,
    pub hops: Vec<RelationInstance>,
    pub contribution: f64,
    pub role: Option<RoleClass>,
    pub text: String,
    /// True for the chain that decided the suspect's score.
    pub winning: bool,
}

impl ChainEvidence {
    fn from_scored(scored: &ScoredChain, winning: bool) -> Self {
        let chain = &scored.chain;
        Self {
            path: chain.entities().into_iter().map(str::to_string).collect(),
            relations: chain.hops().iter().map(|h| h.relation.clone()).collect(),
            hops: chain.hops().to_vec(),
            contribution: scored.contribution,
            role: scored.role,
            text: chain.render(),
            winning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspectProfile {
    pub entity_id: String,
    pub score: f64,
    pub role: RoleClass,
    /// 1-based.
    pub rank: usize,
    /// Winning chain first.
    pub evidence_chains: Vec<ChainEvidence>,
    /// Most recent date on the winning chain.
    pub latest_date: Option<NaiveDate>,
}

impl SuspectProfile {
    pub fn winning_chain(&self) -> Option<&ChainEvidence> {
        self.evidence_chains.iter().find(|c| c.winning)
    }
}

/// Everything retrieved, scored or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvidenceSection {
    pub chains: Vec<ChainEvidence>,
    /// Secondary suspect id → outgoing relations that miss the target.
    pub surfaces: BTreeMap<String, Vec<RelationInstance>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub id: Uuid,
    pub question: String,
    pub status: BundleStatus,
    pub partial: bool,
    pub timed_out: Vec<QueryShape>,
    /// Shapes whose results hit the store's row limit.
    pub truncated: Vec<QueryShape>,
    pub targets: Vec<String>,
    pub secondary: Vec<String>,
    pub suspects: Vec<SuspectProfile>,
    pub raw_evidence: RawEvidenceSection,
    pub max_hops: usize,
    pub generated_at: DateTime<Utc>,
}

impl EvidenceBundle {
    fn empty(question: &str, status: BundleStatus, max_hops: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.to_string(),
            status,
            partial: false,
            timed_out: Vec::new(),
            truncated: Vec::new(),
            targets: Vec::new(),
            secondary: Vec::new(),
            suspects: Vec::new(),
            raw_evidence: RawEvidenceSection::default(),
            max_hops,
            generated_at: Utc::now(),
        }
    }

    pub fn no_such_entity(question: &str, max_hops: usize) -> Self {
        Self::empty(question, BundleStatus::NoSuchEntity, max_hops)
    }

    /// Assemble the bundle from scored candidates. Candidates with no
    /// weighted chain stay in the raw evidence but are not ranked.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        question: &str,
        targets: Vec<String>,
        secondary: Vec<String>,
        scored: Vec<ScoredCandidate>,
        aggregated: &AggregatedEvidence,
        scorer: &CulpabilityScorer,
        raw: &RawEvidence,
        max_hops: usize,
    ) -> Self {
        let mut raw_chains: Vec<ChainEvidence> = scored
            .iter()
            .flat_map(|c| c.chains.iter().map(|s| ChainEvidence::from_scored(s, false)))
            .chain(
                aggregated
                    .excluded
                    .iter()
                    .map(|c| ChainEvidence::from_scored(&scorer.score_chain(c), false)),
            )
            .collect();
        raw_chains.sort_by(|a, b| a.text.cmp(&b.text));

        let status = if raw_chains.is_empty() {
            BundleStatus::NoEvidence
        } else {
            BundleStatus::Ranked
        };

        let mut bundle = Self::empty(question, status, max_hops);
        bundle.partial = raw.is_partial();
        bundle.timed_out = raw.timed_out.clone();
        bundle.truncated = raw.truncated.clone();
        bundle.targets = targets;
        bundle.secondary = secondary;
        bundle.suspects = rank_suspects(scored);
        bundle.raw_evidence = RawEvidenceSection {
            chains: raw_chains,
            surfaces: aggregated.surfaces.clone(),
        };
        bundle
    }

    pub fn top_suspect(&self) -> Option<&SuspectProfile> {
        self.suspects.first()
    }

    pub fn suspect(&self, entity_id: &str) -> Option<&SuspectProfile> {
        self.suspects.iter().find(|s| s.entity_id == entity_id)
    }

    /// Compact text form: header, ranked suspects with their chains, then the
    /// raw evidence. Chains read in path order, `A -[:REL]-> B -[:REL]-> C`.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Question: {}", self.question);
        let _ = writeln!(out, "Status: {}", self.status);
        if !self.timed_out.is_empty() {
            let _ = writeln!(out, "PARTIAL: timed out: {}", join_shapes(&self.timed_out));
        }
        if !self.truncated.is_empty() {
            let _ = writeln!(out, "PARTIAL: row limit reached: {}", join_shapes(&self.truncated));
        }

        match self.status {
            BundleStatus::NoSuchEntity => {
                let _ = writeln!(out, "No entity in the graph matches the subject of the question.");
                return out;
            }
            BundleStatus::NoEvidence => {
                let _ = writeln!(out, "Targets: {}", self.targets.join(", "));
                let _ = writeln!(out, "No relation in the graph reaches the target.");
                return out;
            }
            BundleStatus::Ranked => {}
        }

        let _ = writeln!(out, "Targets: {}", self.targets.join(", "));
        if !self.secondary.is_empty() {
            let _ = writeln!(out, "Named suspects: {}", self.secondary.join(", "));
        }
        let _ = writeln!(out, "Max hops: {}", self.max_hops);

        let _ = writeln!(out, "\nSuspects:");
        if self.suspects.is_empty() {
            let _ = writeln!(out, "  (none carry weighted evidence)");
        }
        for s in &self.suspects {
            let _ = writeln!(
                out,
                "{}. {} | role={} | score={:.4}",
                s.rank, s.entity_id, s.role, s.score
            );
            for c in s.evidence_chains.iter().filter(|c| c.contribution > 0.0) {
                let marker = if c.winning { "*" } else { "-" };
                let _ = writeln!(out, "   {marker} {} ({:.4})", c.text, c.contribution);
            }
        }

        let _ = writeln!(out, "\nRaw evidence:");
        for c in &self.raw_evidence.chains {
            let _ = writeln!(out, "  - {}{}", c.text, render_attrs(&c.hops));
        }

        if !self.raw_evidence.surfaces.is_empty() {
            let _ = writeln!(out, "\nNamed suspect relations:");
            for rels in self.raw_evidence.surfaces.values() {
                for r in rels {
                    let _ = writeln!(out, "  - {r}{}", render_attrs(std::slice::from_ref(r)));
                }
            }
        }
        out
    }
}

fn join_shapes(shapes: &[QueryShape]) -> String {
    shapes.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

fn render_attrs(hops: &[RelationInstance]) -> String {
    let attrs: Vec<String> = hops
        .iter()
        .flat_map(|h| h.attributes.iter().map(|(k, v)| format!("{k}={v}")))
        .collect();
    if attrs.is_empty() {
        String::new()
    } else {
        format!(" [{}]", attrs.join(", "))
    }
}

/// Rank implicated candidates: score, role severity, most recent date, then
/// id. The order is total, so equal inputs always rank identically.
pub fn rank_suspects(scored: Vec<ScoredCandidate>) -> Vec<SuspectProfile> {
    let mut profiles: Vec<SuspectProfile> = scored
        .into_iter()
        .filter_map(|candidate| {
            let winner = candidate.winner()?.clone();
            let role = winner.role?;
            let evidence_chains = candidate
                .chains
                .iter()
                .enumerate()
                .map(|(i, c)| ChainEvidence::from_scored(c, i == 0))
                .collect();
            Some(SuspectProfile {
                entity_id: candidate.entity_id,
                score: candidate.score,
                role,
                rank: 0,
                evidence_chains,
                latest_date: winner.latest_date(),
            })
        })
        .collect();

    profiles.sort_by(compare_suspects);
    for (i, p) in profiles.iter_mut().enumerate() {
        p.rank = i + 1;
    }
    profiles
}

fn compare_suspects(a: &SuspectProfile, b: &SuspectProfile) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.role.severity().cmp(&a.role.severity()))
        .then_with(|| b.latest_date.cmp(&a.latest_date))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use noir_common::{EvidenceChain, RelationTaxonomy};

    use crate::aggregator::CandidateEvidence;

    fn scorer() -> CulpabilityScorer {
        CulpabilityScorer::new(Arc::new(RelationTaxonomy::builtin()))
    }

    fn direct(s: &str, r: &str, t: &str) -> EvidenceChain {
        EvidenceChain::direct(RelationInstance::new(s, r, t))
    }

    fn candidate(id: &str, chains: Vec<EvidenceChain>) -> CandidateEvidence {
        CandidateEvidence {
            entity_id: id.into(),
            chains,
        }
    }

    #[test]
    fn ranking_is_total_and_ties_break_by_id() {
        let s = scorer();
        let scored = s.score_all(&[
            candidate("Zed", vec![direct("Zed", "KILLED", "T")]),
            candidate("Amy", vec![direct("Amy", "KILLED", "T")]),
            candidate("Bob", vec![direct("Bob", "HIRED_HITMAN", "T")]),
            candidate("Car", vec![direct("Car", "USED_IN", "T")]),
        ]);
        let ranked = rank_suspects(scored);
        let order: Vec<(&str, usize)> = ranked.iter().map(|p| (p.entity_id.as_str(), p.rank)).collect();
        assert_eq!(order, vec![("Amy", 1), ("Zed", 2), ("Bob", 3)]);
    }

    #[test]
    fn equal_scores_break_on_severity_then_date() {
        let mut taxonomy_entries: Vec<(String, RoleClass, f64)> = RelationTaxonomy::builtin()
            .iter()
            .map(|(l, e)| (l.to_string(), e.role, e.weight))
            .collect();
        taxonomy_entries.push(("FUNDED".into(), RoleClass::Accomplice, 0.99));
        let s = CulpabilityScorer::new(Arc::new(
            RelationTaxonomy::from_entries(taxonomy_entries).unwrap(),
        ));

        let dated = EvidenceChain::direct(
            RelationInstance::new("Early", "KILLED", "T").with_attr("date", "1996-09-07"),
        );
        let scored = s.score_all(&[
            candidate("Funder", vec![direct("Funder", "FUNDED", "T")]),
            candidate("Undated", vec![direct("Undated", "KILLED", "T")]),
            candidate("Early", vec![dated]),
        ]);
        let ranked = rank_suspects(scored);
        let ids: Vec<&str> = ranked.iter().map(|p| p.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["Early", "Undated", "Funder"]);
    }

    #[test]
    fn render_text_reads_in_path_order() {
        let s = scorer();
        let chain = EvidenceChain::from_hops(vec![
            RelationInstance::new("Keffe D", "ORDERED_HIT", "Orlando Anderson"),
            RelationInstance::new("Orlando Anderson", "SHOT_AT", "Tupac Shakur")
                .with_attr("date", "1996-09-07"),
        ])
        .unwrap();
        let candidates = vec![candidate("Keffe D", vec![chain])];
        let aggregated = AggregatedEvidence {
            candidates: candidates.clone(),
            ..AggregatedEvidence::default()
        };
        let bundle = EvidenceBundle::assemble(
            "Who killed Tupac?",
            vec!["Tupac Shakur".into()],
            vec![],
            s.score_all(&candidates),
            &aggregated,
            &s,
            &RawEvidence::default(),
            3,
        );
        let text = bundle.render_text();
        assert!(text.contains(
            "Keffe D -[:ORDERED_HIT]-> Orlando Anderson -[:SHOT_AT]-> Tupac Shakur"
        ));
        assert!(text.contains("1. Keffe D | role=mastermind | score=0.9405"));
        assert!(text.contains("[date=1996-09-07]"));
        assert!(!text.contains("PARTIAL"));
    }

    #[test]
    fn no_such_entity_bundle_is_empty() {
        let bundle = EvidenceBundle::no_such_entity("Who killed Nobody?", 3);
        assert_eq!(bundle.status, BundleStatus::NoSuchEntity);
        assert!(bundle.suspects.is_empty());
        assert!(bundle.raw_evidence.chains.is_empty());

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["status"], "no_such_entity");
        assert_eq!(json["partial"], false);
    }
}
