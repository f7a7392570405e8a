use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use noir_common::{Entity, NoirError, RelationTaxonomy};

use crate::store::{CatalogEntry, EvidenceStore};

/// Result of resolving a name fragment: every matching canonical id, sorted.
/// Empty means "no such entity", which callers report rather than fail on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub fragment: String,
    pub ids: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.binary_search_by(|probe| probe.as_str().cmp(id)).is_ok()
    }
}

/// An entity named somewhere in a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub entity_id: String,
    /// The question text that matched, as the user wrote it.
    pub text: String,
    /// Byte offset of the match in the question.
    pub position: usize,
}

pub struct EntityResolver {
    store: Arc<dyn EvidenceStore>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        Self { store }
    }

    /// Map a name fragment to every entity whose id or alias contains it,
    /// ignoring case. Multiple matches are all kept.
    pub async fn resolve(&self, fragment: &str) -> Result<Resolution, NoirError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(Resolution::default());
        }

        let entities = self.store.find_entities(fragment).await?;
        let resolution = resolution_from(fragment, &entities);
        debug!(fragment, matches = resolution.len(), "Resolved fragment");
        Ok(resolution)
    }

    /// Entities named in `question`, in order of appearance. The scan runs
    /// on the blocking pool so callers' deadlines and cancellation still apply.
    pub async fn mentions(&self, question: &str) -> Result<(Vec<Mention>, Vec<CatalogEntry>), NoirError> {
        let catalog = self.store.catalog().await?;
        let question = question.to_string();
        let (mentions, catalog) = tokio::task::spawn_blocking(move || {
            let mentions = find_mentions(&question, &catalog);
            (mentions, catalog)
        })
        .await
        .map_err(|e| NoirError::Anyhow(e.into()))?;
        debug!(catalog = catalog.len(), mentions = mentions.len(), "Scanned question for mentions");
        Ok((mentions, catalog))
    }
}

pub(crate) fn resolution_from(fragment: &str, entities: &[Entity]) -> Resolution {
    let mut ids: Vec<String> = entities
        .iter()
        .filter(|e| e.matches_fragment(fragment))
        .map(|e| e.id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    Resolution {
        fragment: fragment.to_string(),
        ids,
    }
}

/// Names an entity can be mentioned by: its id, its aliases, and the first
/// word of its id when that word is at least four characters long.
fn mention_keys(entity: &Entity) -> Vec<&str> {
    let mut keys: Vec<&str> = entity.names().filter(|n| !n.trim().is_empty()).collect();
    if let Some(first) = entity.id.split_whitespace().next() {
        if first.chars().count() >= 4 && first != entity.id {
            keys.push(first);
        }
    }
    keys
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Byte offsets in `question` where a mention may begin: every character
/// that does not continue a word.
fn candidate_starts(question: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_word = false;
    for (i, c) in question.char_indices() {
        if !prev_word {
            starts.push(i);
        }
        prev_word = is_word_char(c);
    }
    starts
}

/// If `hay` begins with `key_lower` ignoring case, the number of `hay` bytes
/// the match covers.
fn prefix_match_len(hay: &str, key_lower: &str) -> Option<usize> {
    let mut needle = key_lower.chars().peekable();
    let mut consumed = 0;
    for c in hay.chars() {
        if needle.peek().is_none() {
            break;
        }
        for lc in c.to_lowercase() {
            if needle.next() != Some(lc) {
                return None;
            }
        }
        consumed += c.len_utf8();
    }
    if needle.peek().is_none() && consumed > 0 {
        Some(consumed)
    } else {
        None
    }
}

/// Earliest word-bounded occurrence of `key_lower` in `question`.
fn find_key(question: &str, starts: &[usize], key_lower: &str) -> Option<(usize, usize)> {
    starts.iter().find_map(|&start| {
        let len = prefix_match_len(&question[start..], key_lower)?;
        let end = start + len;
        let bounded = question[end..].chars().next().map_or(true, |c| !is_word_char(c));
        bounded.then_some((start, end))
    })
}

/// Deterministic mention extraction over the entity catalog. For each entity
/// the earliest match wins, the longest key breaking ties. Mentions are
/// ordered by position, then id.
///
/// The question is scanned once for word starts; each key is then compared
/// only at those offsets, so the cost is linear in the catalog.
pub fn find_mentions(question: &str, catalog: &[CatalogEntry]) -> Vec<Mention> {
    let starts = candidate_starts(question);
    let mut mentions: Vec<Mention> = catalog
        .iter()
        .filter_map(|entry| {
            mention_keys(&entry.entity)
                .into_iter()
                .map(|key| key.trim().to_lowercase())
                .filter(|key| !key.is_empty())
                .filter_map(|key| find_key(question, &starts, &key))
                .min_by(|a, b| a.0.cmp(&b.0).then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0))))
                .map(|(start, end)| Mention {
                    entity_id: entry.entity.id.clone(),
                    text: question[start..end].to_string(),
                    position: start,
                })
        })
        .collect();

    mentions.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    mentions
}

/// How strongly the graph already points at an entity: the heaviest inbound
/// relation weight and the number of inbound relations that carry weight.
fn exposure(entry: Option<&CatalogEntry>, taxonomy: &RelationTaxonomy) -> (f64, usize) {
    let Some(entry) = entry else {
        return (0.0, 0);
    };
    let weights: Vec<f64> = entry
        .inbound
        .iter()
        .map(|r| taxonomy.weight(r))
        .filter(|w| *w > 0.0)
        .collect();
    let max = weights.iter().cloned().fold(0.0_f64, f64::max);
    (max, weights.len())
}

/// Pick the mention most likely to be the entity under investigation: the
/// most exposed one, earliest mention breaking ties. Returns its index.
pub fn select_target(
    mentions: &[Mention],
    catalog: &[CatalogEntry],
    taxonomy: &RelationTaxonomy,
) -> Option<usize> {
    let entry_for = |id: &str| catalog.iter().find(|e| e.entity.id == id);

    (0..mentions.len()).min_by(|&a, &b| {
        let (wa, ca) = exposure(entry_for(&mentions[a].entity_id), taxonomy);
        let (wb, cb) = exposure(entry_for(&mentions[b].entity_id), taxonomy);
        wb.total_cmp(&wa)
            .then_with(|| cb.cmp(&ca))
            .then_with(|| mentions[a].position.cmp(&mentions[b].position))
            .then_with(|| mentions[a].entity_id.cmp(&mentions[b].entity_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noir_common::EntityType;

    fn entry(id: &str, aliases: &[&str], inbound: &[&str]) -> CatalogEntry {
        let mut entity = Entity::new(id, EntityType::Person);
        entity.aliases = aliases.iter().map(|a| a.to_string()).collect();
        CatalogEntry {
            entity,
            inbound: inbound.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            entry("Tupac Shakur", &[], &["SHOT_AT", "ORDERED_HIT_ON", "BEEF_WITH"]),
            entry("Tupac Shooting", &[], &["SUSPECTED_SHOOTER", "USED_IN"]),
            entry("Puff Daddy", &["P. Diddy"], &[]),
            entry("Notorious B.I.G.", &["Biggie Smalls"], &["BEEF_WITH"]),
            entry("Keffe D", &["Duane Keith Davis"], &["HIRED_HITMAN"]),
        ]
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let entities: Vec<Entity> = catalog().into_iter().map(|e| e.entity).collect();
        let lower = resolution_from("tupac", &entities);
        let upper = resolution_from("Tupac", &entities);
        assert_eq!(lower.ids, upper.ids);
        assert_eq!(lower.ids, vec!["Tupac Shakur", "Tupac Shooting"]);
        assert!(lower.contains("Tupac Shooting"));
    }

    #[test]
    fn resolution_matches_aliases_and_drops_non_matches() {
        let entities: Vec<Entity> = catalog().into_iter().map(|e| e.entity).collect();
        assert_eq!(resolution_from("diddy", &entities).ids, vec!["Puff Daddy"]);
        assert!(resolution_from("Nonexistent Person", &entities).is_empty());
    }

    #[test]
    fn mentions_use_first_name_tokens() {
        let mentions = find_mentions("Who killed Tupac?", &catalog());
        let ids: Vec<&str> = mentions.iter().map(|m| m.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["Tupac Shakur", "Tupac Shooting"]);
        assert!(mentions.iter().all(|m| m.text == "Tupac"));
    }

    #[test]
    fn mentions_prefer_full_names_and_keep_order() {
        let mentions = find_mentions("Did puff daddy pay Keffe D to kill Tupac Shakur?", &catalog());
        let found: Vec<(&str, &str)> = mentions
            .iter()
            .map(|m| (m.entity_id.as_str(), m.text.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("Puff Daddy", "puff daddy"),
                ("Keffe D", "Keffe D"),
                ("Tupac Shakur", "Tupac Shakur"),
                ("Tupac Shooting", "Tupac"),
            ]
        );
    }

    #[test]
    fn mentions_respect_word_boundaries() {
        assert!(find_mentions("Who killed Tupacious?", &catalog()).is_empty());
        let mentions = find_mentions("Was Notorious B.I.G. involved?", &catalog());
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].entity_id, "Notorious B.I.G.");
    }

    #[test]
    fn mentions_ignore_case_beyond_ascii() {
        let cat = vec![entry("Éric Zemmour", &[], &[])];
        let mentions = find_mentions("who shot éric zemmour?", &cat);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].text, "éric zemmour");
        assert_eq!(mentions[0].position, 9);
    }

    #[test]
    fn large_catalogs_scan_quickly() {
        let mut cat = catalog();
        for i in 0..5000 {
            let alias = format!("Witness No. {i}");
            cat.push(entry(&format!("Bystander{i:04} Example"), &[alias.as_str()], &[]));
        }

        let started = std::time::Instant::now();
        let mentions = find_mentions("Did Puff Daddy have Tupac killed, or Bystander4242?", &cat);

        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        let ids: Vec<&str> = mentions.iter().map(|m| m.entity_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["Puff Daddy", "Tupac Shakur", "Tupac Shooting", "Bystander4242 Example"]
        );
    }

    #[test]
    fn target_is_most_exposed_mention() {
        let cat = catalog();
        let mentions = find_mentions("Did Puff Daddy have Tupac killed?", &cat);
        let idx = select_target(&mentions, &cat, &RelationTaxonomy::builtin()).unwrap();
        assert_eq!(mentions[idx].entity_id, "Tupac Shakur");
    }

    #[test]
    fn earliest_mention_wins_without_exposure() {
        let cat = vec![entry("Alice Example", &[], &[]), entry("Bobby Example", &[], &[])];
        let mentions = find_mentions("Bobby and Alice", &cat);
        let idx = select_target(&mentions, &cat, &RelationTaxonomy::builtin()).unwrap();
        assert_eq!(mentions[idx].entity_id, "Bobby Example");
        assert!(select_target(&[], &cat, &RelationTaxonomy::builtin()).is_none());
    }
}
