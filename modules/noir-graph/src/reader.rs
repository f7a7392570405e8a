use std::collections::BTreeMap;

use async_trait::async_trait;
use neo4rs::{query, Row};
use tracing::debug;

use noir_common::{Entity, EntityType, EvidenceChain, NoirError, RelationInstance};

use crate::client::connectivity;
use crate::store::{CatalogEntry, EvidenceStore, GraphStats, QueryRows};
use crate::GraphClient;

/// Upper bound on rows any single evidence query may return. Results cut at
/// this bound come back flagged `truncated`.
pub const DEFAULT_ROW_LIMIT: i64 = 1000;

/// Longest path the chain query will ever expand, whatever the caller asks.
pub const MAX_HOPS_CEILING: usize = 6;

/// Aliases live in an `aliases` list property and/or a single `aka` string.
const ALIASES: &str = "[a IN coalesce(n.aliases, []) | toString(a)]
    + CASE WHEN n.aka IS NULL THEN [] ELSE [toString(n.aka)] END";

/// Relationship properties as `[key, value]` pairs, stringified. Values
/// without a string form (lists, maps) are skipped.
const REL_ATTRS: &str = "[k IN keys(r) WHERE toStringOrNull(r[k]) IS NOT NULL | [k, toStringOrNull(r[k])]]";

/// Read-only Cypher access to the fact graph. Every method is one
/// parametrized template; nothing here writes.
#[derive(Clone)]
pub struct EvidenceReader {
    client: GraphClient,
    row_limit: i64,
}

impl EvidenceReader {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }

    pub fn with_row_limit(mut self, limit: i64) -> Self {
        self.row_limit = limit.max(1);
        self
    }

    /// Evidence queries ask for one row past the limit so a cut-off result
    /// can be told apart from one that fits exactly.
    fn fetch_limit(&self) -> i64 {
        self.row_limit + 1
    }

    fn cap<T>(&self, rows: Vec<T>, seen: usize) -> QueryRows<T> {
        cap_rows(rows, seen, self.row_limit as usize)
    }

    async fn relations(&self, q: neo4rs::Query) -> Result<QueryRows<RelationInstance>, NoirError> {
        let mut out = Vec::new();
        let mut seen = 0;
        let mut stream = self.client.graph.execute(q).await.map_err(connectivity)?;
        while let Some(row) = stream.next().await.map_err(connectivity)? {
            seen += 1;
            if let Some(rel) = row_to_relation(&row) {
                out.push(rel);
            }
        }
        Ok(self.cap(out, seen))
    }
}

#[async_trait]
impl EvidenceStore for EvidenceReader {
    async fn find_entities(&self, fragment: &str) -> Result<Vec<Entity>, NoirError> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let cypher = format!(
            "MATCH (n)
             WHERE n.id IS NOT NULL
             WITH n, {ALIASES} AS aliases
             WHERE toLower(toString(n.id)) CONTAINS $fragment
                OR any(a IN aliases WHERE toLower(a) CONTAINS $fragment)
             RETURN toString(n.id) AS id, labels(n) AS labels, aliases
             ORDER BY id
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("fragment", needle.as_str())
            .param("limit", self.row_limit);

        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(connectivity)?;
        while let Some(row) = stream.next().await.map_err(connectivity)? {
            if let Some(entity) = row_to_entity(&row) {
                out.push(entity);
            }
        }
        debug!(fragment, matches = out.len(), "Entity lookup");
        Ok(out)
    }

    async fn catalog(&self) -> Result<Vec<CatalogEntry>, NoirError> {
        let cypher = format!(
            "MATCH (n)
             WHERE n.id IS NOT NULL
             OPTIONAL MATCH ()-[r]->(n)
             WITH n, collect(type(r)) AS inbound
             RETURN toString(n.id) AS id, labels(n) AS labels, {ALIASES} AS aliases, inbound
             ORDER BY id"
        );

        let mut out = Vec::new();
        let mut stream = self
            .client
            .graph
            .execute(query(&cypher))
            .await
            .map_err(connectivity)?;
        while let Some(row) = stream.next().await.map_err(connectivity)? {
            if let Some(entity) = row_to_entity(&row) {
                let inbound: Vec<String> = row.get("inbound").unwrap_or_default();
                out.push(CatalogEntry { entity, inbound });
            }
        }
        Ok(out)
    }

    async fn direct_in(&self, targets: &[String]) -> Result<QueryRows<RelationInstance>, NoirError> {
        let cypher = format!(
            "MATCH (a)-[r]->(t)
             WHERE t.id IN $targets AND a.id IS NOT NULL
             RETURN toString(a.id) AS source, type(r) AS relation, toString(t.id) AS target,
                    elementId(r) AS handle, {REL_ATTRS} AS attrs
             ORDER BY source, relation, target, handle
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("targets", targets.to_vec())
            .param("limit", self.fetch_limit());
        self.relations(q).await
    }

    async fn chain_in(
        &self,
        targets: &[String],
        max_hops: usize,
    ) -> Result<QueryRows<EvidenceChain>, NoirError> {
        // Variable-length bounds cannot be parameters.
        let max_hops = max_hops.clamp(2, MAX_HOPS_CEILING);
        let cypher = format!(
            "MATCH path = (a)-[*2..{max_hops}]->(t)
             WHERE t.id IN $targets
               AND all(n IN nodes(path) WHERE n.id IS NOT NULL)
               AND all(i IN range(0, size(nodes(path)) - 2)
                       WHERE NOT nodes(path)[i] IN nodes(path)[i + 1..])
             RETURN [n IN nodes(path) | toString(n.id)] AS node_ids,
                    [r IN relationships(path) | type(r)] AS rel_types,
                    [r IN relationships(path) | elementId(r)] AS handles,
                    [r IN relationships(path) | {REL_ATTRS}] AS rel_attrs
             ORDER BY size(rel_types), node_ids, rel_types, handles
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("targets", targets.to_vec())
            .param("limit", self.fetch_limit());

        let mut out = Vec::new();
        let mut seen = 0;
        let mut stream = self.client.graph.execute(q).await.map_err(connectivity)?;
        while let Some(row) = stream.next().await.map_err(connectivity)? {
            seen += 1;
            if let Some(chain) = row_to_chain(&row) {
                out.push(chain);
            }
        }
        let rows = self.cap(out, seen);
        debug!(
            targets = ?targets,
            max_hops,
            chains = rows.rows.len(),
            truncated = rows.truncated,
            "Chain-in query"
        );
        Ok(rows)
    }

    async fn entity_out(&self, sources: &[String]) -> Result<QueryRows<RelationInstance>, NoirError> {
        let cypher = format!(
            "MATCH (a)-[r]->(t)
             WHERE a.id IN $sources AND t.id IS NOT NULL
             RETURN toString(a.id) AS source, type(r) AS relation, toString(t.id) AS target,
                    elementId(r) AS handle, {REL_ATTRS} AS attrs
             ORDER BY source, target, relation, handle
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("sources", sources.to_vec())
            .param("limit", self.fetch_limit());
        self.relations(q).await
    }

    async fn stats(&self) -> Result<GraphStats, NoirError> {
        let g = &self.client.graph;
        let mut stats = GraphStats::default();

        let mut stream = g
            .execute(query("MATCH (n) RETURN count(n) AS count"))
            .await
            .map_err(connectivity)?;
        if let Some(row) = stream.next().await.map_err(connectivity)? {
            stats.nodes = row.get("count").unwrap_or(0);
        }

        let mut stream = g
            .execute(query("MATCH ()-[r]->() RETURN count(r) AS count"))
            .await
            .map_err(connectivity)?;
        if let Some(row) = stream.next().await.map_err(connectivity)? {
            stats.relationships = row.get("count").unwrap_or(0);
        }

        let mut stream = g
            .execute(query(
                "MATCH ()-[r]->()
                 RETURN type(r) AS relation, count(*) AS count
                 ORDER BY count DESC, relation
                 LIMIT 15",
            ))
            .await
            .map_err(connectivity)?;
        while let Some(row) = stream.next().await.map_err(connectivity)? {
            let relation: String = row.get("relation").unwrap_or_default();
            let count: i64 = row.get("count").unwrap_or(0);
            stats.top_relations.push((relation, count));
        }

        Ok(stats)
    }
}

// --- Row decoding ---

fn row_to_entity(row: &Row) -> Option<Entity> {
    let id: String = row.get("id").ok()?;
    let labels: Vec<String> = row.get("labels").unwrap_or_default();
    let aliases: Vec<String> = row.get("aliases").unwrap_or_default();
    Some(Entity {
        id,
        entity_type: EntityType::from_labels(&labels),
        aliases,
    })
}

fn row_to_relation(row: &Row) -> Option<RelationInstance> {
    let source: String = row.get("source").ok()?;
    let relation: String = row.get("relation").ok()?;
    let target: String = row.get("target").ok()?;
    let handle: Option<String> = row.get("handle").ok();
    let attrs: Vec<Vec<String>> = row.get("attrs").unwrap_or_default();
    Some(RelationInstance {
        source,
        relation,
        target,
        attributes: pairs_to_map(attrs),
        handle,
    })
}

fn row_to_chain(row: &Row) -> Option<EvidenceChain> {
    let node_ids: Vec<String> = row.get("node_ids").ok()?;
    let rel_types: Vec<String> = row.get("rel_types").ok()?;
    let handles: Vec<String> = row.get("handles").unwrap_or_default();
    let rel_attrs: Vec<Vec<Vec<String>>> = row.get("rel_attrs").unwrap_or_default();

    if node_ids.len() != rel_types.len() + 1 {
        return None;
    }

    let hops = rel_types
        .into_iter()
        .enumerate()
        .map(|(i, relation)| RelationInstance {
            source: node_ids[i].clone(),
            relation,
            target: node_ids[i + 1].clone(),
            attributes: rel_attrs
                .get(i)
                .cloned()
                .map(pairs_to_map)
                .unwrap_or_default(),
            handle: handles.get(i).cloned(),
        })
        .collect();

    EvidenceChain::from_hops(hops)
}

/// `seen` counts undecodable rows too, so a cut is reported even when some
/// rows were dropped during decoding.
fn cap_rows<T>(rows: Vec<T>, seen: usize, limit: usize) -> QueryRows<T> {
    let mut capped = QueryRows::capped(rows, limit);
    capped.truncated |= seen > limit;
    capped
}

fn pairs_to_map(pairs: Vec<Vec<String>>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|mut kv| {
            if kv.len() != 2 {
                return None;
            }
            let value = kv.pop()?;
            let key = kv.pop()?;
            Some((key, value))
        })
        .collect()
}
