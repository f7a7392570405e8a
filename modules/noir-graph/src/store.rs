// The read-only seam between the investigation core and the graph store.
//
// EvidenceReader implements it against Neo4j; MockStore (testing.rs)
// implements it in memory so the whole pipeline runs without Docker.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use noir_common::{Entity, EvidenceChain, NoirError, RelationInstance};

/// An entity together with the types of every relation pointing at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub entity: Entity,
    pub inbound: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: i64,
    pub relationships: i64,
    /// Relation types by descending frequency.
    pub top_relations: Vec<(String, i64)>,
}

/// Rows from one evidence query. `truncated` means the store held more
/// matches than its row limit let through.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows<T> {
    pub rows: Vec<T>,
    pub truncated: bool,
}

impl<T> QueryRows<T> {
    pub fn complete(rows: Vec<T>) -> Self {
        Self {
            rows,
            truncated: false,
        }
    }

    /// Keep the first `limit` rows, flagging the result if any were cut.
    pub fn capped(mut rows: Vec<T>, limit: usize) -> Self {
        let truncated = rows.len() > limit;
        rows.truncate(limit);
        Self { rows, truncated }
    }
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Entities whose id or alias contains `fragment`, case-insensitively.
    async fn find_entities(&self, fragment: &str) -> Result<Vec<Entity>, NoirError>;

    /// Every entity with its inbound relation types.
    async fn catalog(&self) -> Result<Vec<CatalogEntry>, NoirError>;

    /// Relations whose target is in `targets`.
    async fn direct_in(&self, targets: &[String]) -> Result<QueryRows<RelationInstance>, NoirError>;

    /// Simple paths of 2..=`max_hops` relations ending in `targets`.
    async fn chain_in(
        &self,
        targets: &[String],
        max_hops: usize,
    ) -> Result<QueryRows<EvidenceChain>, NoirError>;

    /// Relations whose source is in `sources`.
    async fn entity_out(&self, sources: &[String]) -> Result<QueryRows<RelationInstance>, NoirError>;

    async fn stats(&self) -> Result<GraphStats, NoirError>;
}

/// One parametrized query dispatched during retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "shape", content = "entity", rename_all = "snake_case")]
pub enum QueryShape {
    DirectIn(String),
    ChainIn(String),
    EntityOut(String),
}

impl QueryShape {
    pub fn entity(&self) -> &str {
        match self {
            QueryShape::DirectIn(id) | QueryShape::ChainIn(id) | QueryShape::EntityOut(id) => id,
        }
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryShape::DirectIn(id) => write!(f, "direct-in({id})"),
            QueryShape::ChainIn(id) => write!(f, "chain-in({id})"),
            QueryShape::EntityOut(id) => write!(f, "entity-out({id})"),
        }
    }
}
