// Test mocks for the investigation pipeline.
//
// MockStore implements EvidenceStore over an in-memory edge list, with
// latency and failure injection per query shape. case_file() loads the
// Las Vegas 1996 graph used across the chain tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use noir_common::{Entity, EntityType, EvidenceChain, NoirError, RelationInstance};

use crate::store::{CatalogEntry, EvidenceStore, GraphStats, QueryRows, QueryShape};

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

struct MockStoreInner {
    entities: BTreeMap<String, Entity>,
    relations: Vec<RelationInstance>,
    delays: HashMap<QueryShape, Duration>,
    delay_all: Option<Duration>,
    failing: HashSet<QueryShape>,
    unreachable: bool,
    row_limit: Option<usize>,
    calls: HashMap<&'static str, usize>,
}

impl MockStoreInner {
    fn rows<T>(&self, rows: Vec<T>) -> QueryRows<T> {
        match self.row_limit {
            Some(limit) => QueryRows::capped(rows, limit),
            None => QueryRows::complete(rows),
        }
    }
}

/// In-memory evidence store. Thread-safe via interior Mutex.
/// Builder pattern: `.entity()`, `.edge()`, `.relation()`, `.delay()`,
/// `.fail()`, `.unreachable()`, `.row_limit()`.
pub struct MockStore {
    inner: Mutex<MockStoreInner>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockStoreInner {
                entities: BTreeMap::new(),
                relations: Vec::new(),
                delays: HashMap::new(),
                delay_all: None,
                failing: HashSet::new(),
                unreachable: false,
                row_limit: None,
                calls: HashMap::new(),
            }),
        }
    }

    pub fn entity(self, entity: Entity) -> Self {
        self.inner
            .lock()
            .unwrap()
            .entities
            .insert(entity.id.clone(), entity);
        self
    }

    pub fn person(self, id: &str) -> Self {
        self.entity(Entity::new(id, EntityType::Person))
    }

    /// Add a relation. Unknown endpoints are registered as objects; every
    /// relation gets a distinct handle, as element ids would.
    pub fn relation(self, mut relation: RelationInstance) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for id in [&relation.source, &relation.target] {
                if !inner.entities.contains_key(id) {
                    inner
                        .entities
                        .insert(id.clone(), Entity::new(id.clone(), EntityType::Object));
                }
            }
            if relation.handle.is_none() {
                relation.handle = Some(format!("rel:{}", inner.relations.len()));
            }
            inner.relations.push(relation);
        }
        self
    }

    pub fn edge(self, source: &str, relation: &str, target: &str) -> Self {
        self.relation(RelationInstance::new(source, relation, target))
    }

    /// Hold back the answer to one query shape.
    pub fn delay(self, shape: QueryShape, by: Duration) -> Self {
        self.inner.lock().unwrap().delays.insert(shape, by);
        self
    }

    /// Hold back every answer, resolution queries included.
    pub fn delay_all(self, by: Duration) -> Self {
        self.inner.lock().unwrap().delay_all = Some(by);
        self
    }

    /// Make one query shape fail with a connectivity error.
    pub fn fail(self, shape: QueryShape) -> Self {
        self.inner.lock().unwrap().failing.insert(shape);
        self
    }

    /// Every query fails with a connectivity error.
    pub fn unreachable(self) -> Self {
        self.inner.lock().unwrap().unreachable = true;
        self
    }

    /// Cap every evidence query at `limit` rows, as the Neo4j reader does.
    pub fn row_limit(self, limit: usize) -> Self {
        self.inner.lock().unwrap().row_limit = Some(limit);
        self
    }

    // --- Assertion helpers ---

    pub fn calls(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Every entity and relation, in insertion order for relations.
    pub fn snapshot(&self) -> (Vec<Entity>, Vec<RelationInstance>) {
        let inner = self.inner.lock().unwrap();
        (
            inner.entities.values().cloned().collect(),
            inner.relations.clone(),
        )
    }

    // --- Internals ---

    /// Record the call and decide how long to wait and whether to fail.
    /// The lock is released before any waiting happens.
    fn admit(&self, method: &'static str, shapes: &[QueryShape]) -> (Option<Duration>, bool) {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(method).or_insert(0) += 1;
        let delay = shapes
            .iter()
            .filter_map(|s| inner.delays.get(s).copied())
            .max()
            .or(inner.delay_all);
        let fail = inner.unreachable || shapes.iter().any(|s| inner.failing.contains(s));
        (delay, fail)
    }

    async fn gate(&self, method: &'static str, shapes: &[QueryShape]) -> Result<(), NoirError> {
        let (delay, fail) = self.admit(method, shapes);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if fail {
            return Err(NoirError::Connectivity(format!(
                "mock store unreachable during {method}"
            )));
        }
        Ok(())
    }
}

/// Simple paths of 2..=max_hops relations ending at `target`, walked
/// backwards over incoming edges.
fn paths_into(relations: &[RelationInstance], target: &str, max_hops: usize) -> Vec<EvidenceChain> {
    fn walk(
        relations: &[RelationInstance],
        node: &str,
        reversed: &mut Vec<RelationInstance>,
        visited: &mut Vec<String>,
        max_hops: usize,
        out: &mut Vec<EvidenceChain>,
    ) {
        for rel in relations.iter().filter(|r| r.target == node) {
            if visited.iter().any(|v| v == &rel.source) {
                continue;
            }
            reversed.push(rel.clone());
            visited.push(rel.source.clone());
            if reversed.len() >= 2 {
                let hops: Vec<RelationInstance> = reversed.iter().rev().cloned().collect();
                if let Some(chain) = EvidenceChain::from_hops(hops) {
                    out.push(chain);
                }
            }
            if reversed.len() < max_hops {
                walk(relations, &rel.source, reversed, visited, max_hops, out);
            }
            visited.pop();
            reversed.pop();
        }
    }

    let mut out = Vec::new();
    let mut visited = vec![target.to_string()];
    walk(relations, target, &mut Vec::new(), &mut visited, max_hops, &mut out);
    out
}

#[async_trait]
impl EvidenceStore for MockStore {
    async fn find_entities(&self, fragment: &str) -> Result<Vec<Entity>, NoirError> {
        self.gate("find_entities", &[]).await?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entities
            .values()
            .filter(|e| e.matches_fragment(fragment))
            .cloned()
            .collect())
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, NoirError> {
        self.gate("catalog", &[]).await?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entities
            .values()
            .map(|e| CatalogEntry {
                entity: e.clone(),
                inbound: inner
                    .relations
                    .iter()
                    .filter(|r| r.target == e.id)
                    .map(|r| r.relation.clone())
                    .collect(),
            })
            .collect())
    }

    async fn direct_in(&self, targets: &[String]) -> Result<QueryRows<RelationInstance>, NoirError> {
        let shapes: Vec<QueryShape> = targets.iter().cloned().map(QueryShape::DirectIn).collect();
        self.gate("direct_in", &shapes).await?;
        let inner = self.inner.lock().unwrap();
        let rows = inner
            .relations
            .iter()
            .filter(|r| targets.contains(&r.target))
            .cloned()
            .collect();
        Ok(inner.rows(rows))
    }

    async fn chain_in(
        &self,
        targets: &[String],
        max_hops: usize,
    ) -> Result<QueryRows<EvidenceChain>, NoirError> {
        let shapes: Vec<QueryShape> = targets.iter().cloned().map(QueryShape::ChainIn).collect();
        self.gate("chain_in", &shapes).await?;
        let inner = self.inner.lock().unwrap();
        let mut chains: Vec<EvidenceChain> = targets
            .iter()
            .flat_map(|t| paths_into(&inner.relations, t, max_hops))
            .collect();
        chains.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.render().cmp(&b.render())));
        Ok(inner.rows(chains))
    }

    async fn entity_out(&self, sources: &[String]) -> Result<QueryRows<RelationInstance>, NoirError> {
        let shapes: Vec<QueryShape> = sources.iter().cloned().map(QueryShape::EntityOut).collect();
        self.gate("entity_out", &shapes).await?;
        let inner = self.inner.lock().unwrap();
        let rows = inner
            .relations
            .iter()
            .filter(|r| sources.contains(&r.source))
            .cloned()
            .collect();
        Ok(inner.rows(rows))
    }

    async fn stats(&self) -> Result<GraphStats, NoirError> {
        self.gate("stats", &[]).await?;
        let inner = self.inner.lock().unwrap();
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        for r in &inner.relations {
            *counts.entry(r.relation.as_str()).or_insert(0) += 1;
        }
        let mut top: Vec<(String, i64)> = counts
            .into_iter()
            .map(|(r, c)| (r.to_string(), c))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(15);
        Ok(GraphStats {
            nodes: inner.entities.len() as i64,
            relationships: inner.relations.len() as i64,
            top_relations: top,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn typed(id: &str, entity_type: EntityType) -> Entity {
    Entity::new(id, entity_type)
}

/// The Las Vegas 1996 case: who shot at Tupac Shakur, who paid for it, and
/// everyone around them.
pub fn case_file() -> MockStore {
    use EntityType::*;

    let store = MockStore::new()
        .entity(typed("Tupac Shakur", Person))
        .entity(typed("Suge Knight", Person))
        .entity(typed("Orlando Anderson", Person))
        .entity(typed("Keffe D", Person).with_alias("Duane Keith Davis"))
        .entity(typed("Puff Daddy", Person).with_alias("P. Diddy"))
        .entity(typed("Notorious B.I.G.", Person).with_alias("Biggie Smalls"))
        .entity(typed("Death Row Records", Organization))
        .entity(typed("Bad Boy Records", Organization))
        .entity(typed("Southside Crips", Organization))
        .entity(typed("Mob Piru Bloods", Organization))
        .entity(typed("MGM Grand Hotel", Location))
        .entity(typed("Lakewood Mall", Location))
        .entity(typed("Las Vegas", Location))
        .entity(typed("White Cadillac", Object))
        .entity(typed("Glock 22", Object))
        .entity(typed("Mike Tyson Fight", Event))
        .entity(typed("Tupac Shooting", Event))
        .entity(typed("MGM Lobby Assault", Event))
        .entity(typed("Quad Studios Shooting", Event))
        .entity(typed("Biggie Murder", Event));

    store
        // Affiliations
        .relation(RelationInstance::new("Tupac Shakur", "SIGNED_TO", "Death Row Records").with_attr("year", "1995"))
        .relation(RelationInstance::new("Suge Knight", "FOUNDED", "Death Row Records").with_attr("year", "1991"))
        .relation(RelationInstance::new("Notorious B.I.G.", "SIGNED_TO", "Bad Boy Records").with_attr("year", "1993"))
        .relation(RelationInstance::new("Puff Daddy", "FOUNDED", "Bad Boy Records").with_attr("year", "1993"))
        .edge("Orlando Anderson", "MEMBER_OF", "Southside Crips")
        .edge("Keffe D", "MEMBER_OF", "Southside Crips")
        .edge("Tupac Shakur", "AFFILIATED_WITH", "Mob Piru Bloods")
        .edge("Death Row Records", "AFFILIATED_WITH", "Mob Piru Bloods")
        .edge("Keffe D", "UNCLE_OF", "Orlando Anderson")
        .edge("Southside Crips", "RIVAL_OF", "Mob Piru Bloods")
        .edge("Death Row Records", "RIVALRY_WITH", "Bad Boy Records")
        // Lakewood Mall and the MGM lobby
        .relation(
            RelationInstance::new("Orlando Anderson", "FOUGHT_WITH", "Death Row Records")
                .with_attr("location", "Lakewood Mall")
                .with_attr("reason", "Chain robbery"),
        )
        .edge("Tupac Shakur", "ATTENDED", "Mike Tyson Fight")
        .edge("Suge Knight", "ATTENDED", "Mike Tyson Fight")
        .relation(
            RelationInstance::new("Tupac Shakur", "ATTACKED", "Orlando Anderson")
                .with_attr("location", "MGM Grand Hotel")
                .with_attr("reason", "Revenge for Lakewood Mall incident"),
        )
        .edge("Tupac Shakur", "PARTICIPATED_IN", "MGM Lobby Assault")
        .edge("Orlando Anderson", "VICTIM_OF", "MGM Lobby Assault")
        // The bounty
        .relation(
            RelationInstance::new("Puff Daddy", "OFFERED_BOUNTY", "Keffe D")
                .with_attr("amount", "1 Million USD")
                .with_attr("target", "Tupac and Suge"),
        )
        .edge("Puff Daddy", "ORDERED_HIT_ON", "Tupac Shakur")
        .edge("Puff Daddy", "ORDERED_HIT_ON", "Suge Knight")
        // The shooting
        .edge("Keffe D", "RODE_IN", "White Cadillac")
        .edge("Orlando Anderson", "RODE_IN", "White Cadillac")
        .edge("White Cadillac", "USED_IN", "Tupac Shooting")
        .edge("Glock 22", "USED_IN", "Tupac Shooting")
        .edge("Orlando Anderson", "SUSPECTED_SHOOTER", "Tupac Shooting")
        .edge("Tupac Shakur", "VICTIM_OF", "Tupac Shooting")
        .edge("Tupac Shakur", "DIED_FROM", "Tupac Shooting")
        .relation(RelationInstance::new("Suge Knight", "INJURED_IN", "Tupac Shooting").with_attr("injury", "Head fragment"))
        .edge("Suge Knight", "SURVIVED", "Tupac Shooting")
        // East coast
        .edge("Tupac Shakur", "FORMER_FRIEND_OF", "Notorious B.I.G.")
        .relation(
            RelationInstance::new("Tupac Shakur", "BEEF_WITH", "Notorious B.I.G.")
                .with_attr("reason", "Hit Em Up diss track")
                .with_attr("year", "1996"),
        )
        .relation(
            RelationInstance::new("Tupac Shakur", "SUSPECTED", "Notorious B.I.G.")
                .with_attr("reason", "Believed Biggie knew about 1994 shooting"),
        )
        .edge("Tupac Shakur", "VICTIM_OF", "Quad Studios Shooting")
        .edge("Notorious B.I.G.", "DIED_FROM", "Biggie Murder")
        // The hit chain
        .relation(
            RelationInstance::new("Puff Daddy", "HIRED_HITMAN", "Keffe D")
                .with_attr("amount", "1 Million USD")
                .with_attr("purpose", "Kill Tupac and Suge"),
        )
        .relation(RelationInstance::new("Keffe D", "ORDERED_HIT", "Orlando Anderson").with_attr("target", "Tupac Shakur"))
        .relation(RelationInstance::new("Keffe D", "GAVE_WEAPON", "Orlando Anderson").with_attr("type", "Glock 22"))
        .relation(
            RelationInstance::new("Orlando Anderson", "SHOT_AT", "Tupac Shakur")
                .with_attr("date", "1996-09-07")
                .with_attr("location", "Las Vegas"),
        )
        .edge("Orlando Anderson", "SUSPECTED_KILLER_OF", "Tupac Shakur")
        .relation(
            RelationInstance::new("Puff Daddy", "BEEF_WITH", "Tupac Shakur")
                .with_attr("reason", "East vs West Coast War"),
        )
        .edge("Puff Daddy", "ALLEGEDLY_ORCHESTRATED_MURDER_OF", "Tupac Shakur")
        .relation(RelationInstance::new("Keffe D", "ORCHESTRATED_MURDER_OF", "Tupac Shakur").with_attr("role", "Middleman"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_walk_yields_only_simple_paths() {
        let rels = vec![
            RelationInstance::new("T", "ATTACKED", "O"),
            RelationInstance::new("O", "SHOT_AT", "T"),
            RelationInstance::new("K", "ORDERED_HIT", "O"),
            RelationInstance::new("P", "HIRED_HITMAN", "K"),
        ];
        let rendered: Vec<String> = paths_into(&rels, "T", 3).iter().map(|c| c.render()).collect();
        assert_eq!(
            rendered,
            vec![
                "K -[:ORDERED_HIT]-> O -[:SHOT_AT]-> T".to_string(),
                "P -[:HIRED_HITMAN]-> K -[:ORDERED_HIT]-> O -[:SHOT_AT]-> T".to_string(),
            ]
        );
        assert_eq!(paths_into(&rels, "T", 2).len(), 1);
    }

    #[tokio::test]
    async fn row_limit_keeps_shortest_chains_and_flags_the_cut() {
        let store = case_file().row_limit(3);
        let target = ["Tupac Shakur".to_string()];

        let chains = store.chain_in(&target, 3).await.unwrap();
        assert!(chains.truncated);
        assert_eq!(chains.rows.len(), 3);
        assert!(chains.rows.iter().all(|c| c.len() == 2));

        let full = case_file().chain_in(&target, 3).await.unwrap();
        assert!(!full.truncated);
        assert!(full.rows.len() > 3);
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let store = MockStore::new().edge("A", "KILLED", "B").unreachable();
        assert!(matches!(
            store.direct_in(&["B".to_string()]).await,
            Err(NoirError::Connectivity(_))
        ));
        assert_eq!(store.calls("direct_in"), 1);
    }
}
