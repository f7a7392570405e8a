use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NoirError;
use crate::types::RoleClass;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub role: RoleClass,
    pub weight: f64,
}

/// Relation type label → (role class, weight). One entry per label.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationTaxonomy {
    entries: BTreeMap<String, TaxonomyEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaxonomyFile {
    relations: Vec<TaxonomyRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaxonomyRecord {
    relation: String,
    role: RoleClass,
    weight: f64,
}

const BUILTIN: &[(RoleClass, f64, &[&str])] = &[
    (
        RoleClass::Executor,
        0.99,
        &["SHOT_AT", "KILLED", "SUSPECTED_KILLER_OF", "SUSPECTED_SHOOTER"],
    ),
    (
        RoleClass::Mastermind,
        0.95,
        &[
            "HIRED_HITMAN",
            "ORDERED_HIT",
            "ORDERED_HIT_ON",
            "OFFERED_BOUNTY",
            "ALLEGEDLY_ORCHESTRATED_MURDER_OF",
        ],
    ),
    (
        RoleClass::Accomplice,
        0.70,
        &["GAVE_WEAPON", "RODE_IN", "ORCHESTRATED_MURDER_OF"],
    ),
    (RoleClass::Suspect, 0.30, &["BEEF_WITH", "RIVAL_OF", "ATTACKED"]),
];

impl RelationTaxonomy {
    /// The weight table the profiler ships with.
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .flat_map(|(role, weight, labels)| {
                labels.iter().map(move |l| {
                    (
                        l.to_string(),
                        TaxonomyEntry {
                            role: *role,
                            weight: *weight,
                        },
                    )
                })
            })
            .collect();
        Self { entries }
    }

    /// Build from (label, role, weight) triples, validating every entry.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, NoirError>
    where
        I: IntoIterator<Item = (S, RoleClass, f64)>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (label, role, weight) in entries {
            let key = normalize_label(label.as_ref());
            if key.is_empty() {
                return Err(NoirError::Taxonomy("empty relation label".into()));
            }
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(NoirError::Taxonomy(format!(
                    "weight for {key} must be within [0, 1], got {weight}"
                )));
            }
            if map.insert(key.clone(), TaxonomyEntry { role, weight }).is_some() {
                return Err(NoirError::Taxonomy(format!("duplicate entry for {key}")));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn from_json_str(json: &str) -> Result<Self, NoirError> {
        let file: TaxonomyFile = serde_json::from_str(json)
            .map_err(|e| NoirError::Taxonomy(format!("invalid taxonomy JSON: {e}")))?;
        Self::from_entries(
            file.relations
                .into_iter()
                .map(|r| (r.relation, r.role, r.weight)),
        )
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NoirError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            NoirError::Taxonomy(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, NoirError> {
        let file = TaxonomyFile {
            relations: self
                .entries
                .iter()
                .map(|(relation, e)| TaxonomyRecord {
                    relation: relation.clone(),
                    role: e.role,
                    weight: e.weight,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&file)
            .map_err(|e| NoirError::Taxonomy(format!("cannot serialize taxonomy: {e}")))
    }

    pub fn entry(&self, label: &str) -> Option<&TaxonomyEntry> {
        self.entries
            .get(label)
            .or_else(|| self.entries.get(&normalize_label(label)))
    }

    /// Unknown relation types weigh nothing.
    pub fn weight(&self, label: &str) -> f64 {
        self.entry(label).map(|e| e.weight).unwrap_or(0.0)
    }

    pub fn role(&self, label: &str) -> Option<RoleClass> {
        self.entry(label).map(|e| e.role)
    }

    /// Labels of one role class, sorted.
    pub fn labels_for(&self, role: RoleClass) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.role == role)
            .map(|(l, _)| l.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaxonomyEntry)> {
        self.entries.iter().map(|(l, e)| (l.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RelationTaxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

/// `shot at` / `shot-at` / `SHOT_AT` all normalize to `SHOT_AT`.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
