pub mod aggregator;
pub mod bundle;
pub mod client;
pub mod investigation;
pub mod reader;
pub mod resolver;
pub mod retriever;
pub mod scorer;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(feature = "test-utils")]
pub mod testutil;


pub use aggregator::{aggregate, AggregatedEvidence, CandidateEvidence};
pub use bundle::{BundleStatus, ChainEvidence, EvidenceBundle, RawEvidenceSection, SuspectProfile};
pub use client::GraphClient;
pub use investigation::{InvestigationRequest, Investigator};
pub use neo4rs::query;
pub use reader::EvidenceReader;
pub use resolver::{EntityResolver, Mention, Resolution};
pub use retriever::{EvidenceRetriever, RawEvidence, RetrievalOptions};
pub use scorer::{CulpabilityScorer, ScoredCandidate, ScoredChain};
pub use store::{CatalogEntry, EvidenceStore, GraphStats, QueryRows, QueryShape};
pub use tokio_util::sync::CancellationToken;
