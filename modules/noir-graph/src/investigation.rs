use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use noir_common::{NoirError, RelationTaxonomy};

use crate::aggregator::aggregate;
use crate::bundle::EvidenceBundle;
use crate::resolver::{select_target, EntityResolver};
use crate::retriever::{EvidenceRetriever, RetrievalOptions};
use crate::scorer::CulpabilityScorer;
use crate::store::EvidenceStore;

/// An explicit investigation. Without a `target`, the target and any named
/// suspects are read out of `question`.
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct InvestigationRequest {
    #[builder(setter(into))]
    pub question: String,
    /// Name fragment of the entity under investigation.
    #[builder(default, setter(strip_option, into))]
    pub target: Option<String>,
    /// Name fragments of secondary suspects.
    #[builder(default)]
    pub suspects: Vec<String>,
    #[builder(default, setter(strip_option))]
    pub max_hops: Option<usize>,
}

/// Runs the resolve → retrieve → aggregate → score → bundle pipeline. Holds
/// only the shared store handle and immutable configuration, so one
/// investigator can serve concurrent investigations.
pub struct Investigator {
    resolver: EntityResolver,
    store: Arc<dyn EvidenceStore>,
    taxonomy: Arc<RelationTaxonomy>,
    scorer: CulpabilityScorer,
    options: RetrievalOptions,
}

impl Investigator {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        taxonomy: Arc<RelationTaxonomy>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(store.clone()),
            scorer: CulpabilityScorer::new(taxonomy.clone()),
            store,
            taxonomy,
            options,
        }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub fn taxonomy(&self) -> &RelationTaxonomy {
        &self.taxonomy
    }

    /// Investigate a free-text question.
    pub async fn run_investigation(&self, question: &str) -> Result<EvidenceBundle, NoirError> {
        let request = InvestigationRequest::builder().question(question).build();
        self.investigate(&request).await
    }

    pub async fn investigate(
        &self,
        request: &InvestigationRequest,
    ) -> Result<EvidenceBundle, NoirError> {
        self.investigate_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`investigate`](Self::investigate), but abandons every pending
    /// query once `cancel` fires. A cancelled investigation yields no bundle.
    pub async fn investigate_with_cancel(
        &self,
        request: &InvestigationRequest,
        cancel: CancellationToken,
    ) -> Result<EvidenceBundle, NoirError> {
        let id = Uuid::new_v4();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(investigation = %id, "Investigation cancelled");
                Err(NoirError::Cancelled)
            }
            result = self.investigate_inner(id, request) => result,
        }
    }

    async fn investigate_inner(
        &self,
        id: Uuid,
        request: &InvestigationRequest,
    ) -> Result<EvidenceBundle, NoirError> {
        let max_hops = request
            .max_hops
            .unwrap_or(self.options.max_hops);
        let options = RetrievalOptions {
            max_hops,
            ..self.options.clone()
        };
        let max_hops = options.effective_max_hops();
        info!(investigation = %id, question = request.question.as_str(), max_hops, "Starting investigation");

        // Target fragment plus secondary ids named in the question itself.
        let (target_fragment, mut secondary) = match &request.target {
            Some(fragment) => (fragment.clone(), Vec::new()),
            None => {
                let (mentions, catalog) = self
                    .bounded("mentions", self.resolver.mentions(&request.question))
                    .await?;
                let Some(idx) = select_target(&mentions, &catalog, &self.taxonomy) else {
                    info!(investigation = %id, "No known entity mentioned in question");
                    return Ok(with_id(
                        EvidenceBundle::no_such_entity(&request.question, max_hops),
                        id,
                    ));
                };
                debug!(
                    investigation = %id,
                    mentions = mentions.len(),
                    target = mentions[idx].entity_id.as_str(),
                    "Selected target from question"
                );
                let others = mentions
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != idx)
                    .map(|(_, m)| m.entity_id.clone())
                    .collect();
                (mentions[idx].text.clone(), others)
            }
        };

        let targets = self
            .bounded("resolve", self.resolver.resolve(&target_fragment))
            .await?;
        if targets.is_empty() {
            info!(investigation = %id, fragment = target_fragment.as_str(), "No such entity");
            return Ok(with_id(
                EvidenceBundle::no_such_entity(&request.question, max_hops),
                id,
            ));
        }

        for fragment in &request.suspects {
            let resolution = self
                .bounded("resolve", self.resolver.resolve(fragment))
                .await?;
            if resolution.is_empty() {
                warn!(investigation = %id, fragment = fragment.as_str(), "Named suspect matches no entity");
            }
            secondary.extend(resolution.ids);
        }
        secondary.retain(|s| !targets.contains(s));
        secondary.sort();
        secondary.dedup();

        info!(
            investigation = %id,
            targets = ?targets.ids,
            secondary = ?secondary,
            "Resolved entities"
        );

        let retriever = EvidenceRetriever::new(self.store.clone(), options);
        let raw = retriever.retrieve(&targets.ids, &secondary).await?;
        let aggregated = aggregate(&raw, &targets.ids);
        let scored = self.scorer.score_all(&aggregated.candidates);

        let bundle = EvidenceBundle::assemble(
            &request.question,
            targets.ids,
            secondary,
            scored,
            &aggregated,
            &self.scorer,
            &raw,
            max_hops,
        );

        info!(
            investigation = %id,
            status = %bundle.status,
            suspects = bundle.suspects.len(),
            chains = bundle.raw_evidence.chains.len(),
            partial = bundle.partial,
            top = bundle.top_suspect().map(|s| s.entity_id.as_str()).unwrap_or("-"),
            "Investigation complete"
        );
        Ok(with_id(bundle, id))
    }

    /// Resolution queries get the same per-query deadline as retrieval.
    async fn bounded<T>(
        &self,
        label: &str,
        fut: impl Future<Output = Result<T, NoirError>>,
    ) -> Result<T, NoirError> {
        match tokio::time::timeout(self.options.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(query = label, "Resolution query timed out");
                Err(NoirError::Timeout {
                    shapes: vec![label.to_string()],
                })
            }
        }
    }
}

fn with_id(mut bundle: EvidenceBundle, id: Uuid) -> EvidenceBundle {
    bundle.id = id;
    bundle
}
