use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use noir_common::{EvidenceChain, NoirError, RelationInstance};

use crate::reader::MAX_HOPS_CEILING;
use crate::store::{EvidenceStore, QueryRows, QueryShape};

pub const DEFAULT_MAX_HOPS: usize = 3;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// Longest chain considered. Clamped to [2, MAX_HOPS_CEILING].
    #[builder(default = DEFAULT_MAX_HOPS)]
    pub max_hops: usize,
    /// Deadline applied to each dispatched query independently.
    #[builder(default = DEFAULT_QUERY_TIMEOUT)]
    pub query_timeout: Duration,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetrievalOptions {
    pub fn effective_max_hops(&self) -> usize {
        self.max_hops.clamp(2, MAX_HOPS_CEILING)
    }
}

/// Everything the dispatched queries returned, before aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvidence {
    /// Direct-in results.
    pub direct: Vec<RelationInstance>,
    /// Chain-in results, already restricted to simple paths ending at a target.
    pub chains: Vec<EvidenceChain>,
    /// Entity-out results for named secondary entities.
    pub outgoing: Vec<RelationInstance>,
    /// Shapes that missed their deadline.
    pub timed_out: Vec<QueryShape>,
    /// Shapes whose answer hit the store's row limit.
    pub truncated: Vec<QueryShape>,
    pub dispatched: usize,
}

impl RawEvidence {
    pub fn is_partial(&self) -> bool {
        !self.timed_out.is_empty() || !self.truncated.is_empty()
    }
}

enum ShapeRows {
    Relations(QueryRows<RelationInstance>),
    Chains(QueryRows<EvidenceChain>),
}

impl ShapeRows {
    fn truncated(&self) -> bool {
        match self {
            ShapeRows::Relations(r) => r.truncated,
            ShapeRows::Chains(c) => c.truncated,
        }
    }
}

pub struct EvidenceRetriever {
    store: Arc<dyn EvidenceStore>,
    options: RetrievalOptions,
}

impl EvidenceRetriever {
    pub fn new(store: Arc<dyn EvidenceStore>, options: RetrievalOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// One direct-in and one chain-in per target, one entity-out per
    /// secondary entity.
    pub fn plan(targets: &[String], secondary: &[String]) -> Vec<QueryShape> {
        let mut shapes = Vec::with_capacity(targets.len() * 2 + secondary.len());
        for t in targets {
            shapes.push(QueryShape::DirectIn(t.clone()));
            shapes.push(QueryShape::ChainIn(t.clone()));
        }
        for s in secondary {
            shapes.push(QueryShape::EntityOut(s.clone()));
        }
        shapes
    }

    /// Dispatch every planned query concurrently and wait for all of them.
    ///
    /// A connectivity failure in any query fails the whole retrieval at once,
    /// dropping the queries still in flight. A query
    /// that misses its deadline contributes nothing and is recorded in
    /// `timed_out`; if every query misses, retrieval fails with `Timeout`.
    /// Dropping the returned future drops every pending query with it.
    pub async fn retrieve(
        &self,
        targets: &[String],
        secondary: &[String],
    ) -> Result<RawEvidence, NoirError> {
        let shapes = Self::plan(targets, secondary);
        if shapes.is_empty() {
            return Ok(RawEvidence::default());
        }

        info!(
            queries = shapes.len(),
            max_hops = self.options.effective_max_hops(),
            "Dispatching evidence queries"
        );

        let outcomes = try_join_all(shapes.iter().map(|shape| self.run_shape(shape))).await?;

        let mut raw = RawEvidence {
            dispatched: shapes.len(),
            ..RawEvidence::default()
        };
        let max_hops = self.options.effective_max_hops();

        for (shape, outcome) in shapes.into_iter().zip(outcomes) {
            match outcome {
                None => {
                    warn!(
                        shape = %shape,
                        timeout_ms = self.options.query_timeout.as_millis() as u64,
                        "Evidence query timed out, continuing without it"
                    );
                    raw.timed_out.push(shape);
                }
                Some(rows) => {
                    if rows.truncated() {
                        warn!(shape = %shape, "Evidence query hit the row limit, results are incomplete");
                        raw.truncated.push(shape.clone());
                    }
                    match rows {
                        ShapeRows::Relations(rels) => match shape {
                            QueryShape::EntityOut(ref source) => raw
                                .outgoing
                                .extend(rels.rows.into_iter().filter(|r| &r.source == source)),
                            QueryShape::DirectIn(ref target) | QueryShape::ChainIn(ref target) => raw
                                .direct
                                .extend(rels.rows.into_iter().filter(|r| &r.target == target)),
                        },
                        ShapeRows::Chains(chains) => {
                            let target = shape.entity();
                            raw.chains.extend(chains.rows.into_iter().filter(|c| {
                                c.target() == target
                                    && (2..=max_hops).contains(&c.len())
                                    && c.is_simple()
                            }));
                        }
                    }
                }
            }
        }

        if raw.timed_out.len() == raw.dispatched {
            return Err(NoirError::Timeout {
                shapes: raw.timed_out.iter().map(|s| s.to_string()).collect(),
            });
        }

        debug!(
            direct = raw.direct.len(),
            chains = raw.chains.len(),
            outgoing = raw.outgoing.len(),
            timed_out = raw.timed_out.len(),
            truncated = raw.truncated.len(),
            "Evidence retrieved"
        );
        Ok(raw)
    }

    /// `Ok(None)` when the query missed its deadline.
    async fn run_shape(&self, shape: &QueryShape) -> Result<Option<ShapeRows>, NoirError> {
        let store = &self.store;
        let timeout = self.options.query_timeout;
        let max_hops = self.options.effective_max_hops();

        let result = match shape {
            QueryShape::DirectIn(t) => {
                tokio::time::timeout(timeout, store.direct_in(std::slice::from_ref(t)))
                    .await
                    .map(|r| r.map(ShapeRows::Relations))
            }
            QueryShape::ChainIn(t) => {
                tokio::time::timeout(timeout, store.chain_in(std::slice::from_ref(t), max_hops))
                    .await
                    .map(|r| r.map(ShapeRows::Chains))
            }
            QueryShape::EntityOut(s) => {
                tokio::time::timeout(timeout, store.entity_out(std::slice::from_ref(s)))
                    .await
                    .map(|r| r.map(ShapeRows::Relations))
            }
        };

        match result {
            Ok(Ok(rows)) => Ok(Some(rows)),
            Ok(Err(e)) => {
                warn!(shape = %shape, error = %e, "Evidence query failed");
                Err(e)
            }
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_dispatches_two_shapes_per_target() {
        let shapes = EvidenceRetriever::plan(
            &["Tupac Shakur".into(), "Tupac Shooting".into()],
            &["Puff Daddy".into()],
        );
        assert_eq!(
            shapes,
            vec![
                QueryShape::DirectIn("Tupac Shakur".into()),
                QueryShape::ChainIn("Tupac Shakur".into()),
                QueryShape::DirectIn("Tupac Shooting".into()),
                QueryShape::ChainIn("Tupac Shooting".into()),
                QueryShape::EntityOut("Puff Daddy".into()),
            ]
        );
    }

    #[test]
    fn max_hops_is_clamped() {
        let opts = RetrievalOptions::builder().max_hops(1).build();
        assert_eq!(opts.effective_max_hops(), 2);
        let opts = RetrievalOptions::builder().max_hops(40).build();
        assert_eq!(opts.effective_max_hops(), MAX_HOPS_CEILING);
        assert_eq!(RetrievalOptions::default().effective_max_hops(), 3);
    }
}
