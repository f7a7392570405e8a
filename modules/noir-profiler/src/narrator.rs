// Turns a finished evidence bundle into prose. The model only ever sees the
// bundle's text rendering; it never queries the graph and nothing downstream
// parses what it writes.

use std::fmt::Write as _;
use std::sync::Arc;

use ai_client::{truncate_to_char_boundary, Agent, OpenAi, PromptBuilder};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use noir_common::{RelationTaxonomy, RoleClass};
use noir_graph::{BundleStatus, EvidenceBundle};

/// Upper bound on the evidence text placed in a prompt.
pub const DEFAULT_EVIDENCE_BUDGET: usize = 24_000;

const DEFAULT_MAX_TOKENS: u32 = 2048;

#[async_trait]
pub trait NarrativeRenderer: Send + Sync {
    async fn narrate(&self, bundle: &EvidenceBundle) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativePrompt {
    pub preamble: String,
    pub input: String,
}

/// Builds the role-and-rules preamble and the evidence + question input.
pub fn compose_prompt(
    taxonomy: &RelationTaxonomy,
    bundle: &EvidenceBundle,
    evidence_budget: usize,
) -> NarrativePrompt {
    let mut preamble = String::from(
        "You are a criminal profiler reading evidence pulled from a case knowledge graph.\n\
         Every suspect has already been scored; present the ranking as given.\n\n\
         Relation tiers (weight per relation):\n",
    );
    for role in RoleClass::ALL {
        let labels = taxonomy.labels_for(role);
        if labels.is_empty() {
            continue;
        }
        let listed: Vec<String> = labels
            .iter()
            .map(|l| format!("{l} ({:.2})", taxonomy.weight(l)))
            .collect();
        let _ = writeln!(preamble, "- {role}: {}", listed.join(", "));
    }
    preamble.push_str(
        "\nRules:\n\
         1. Use only the evidence below. Do not introduce people, events or relations it does not contain.\n\
         2. Keep the suspect order and scores exactly as listed; report each score as a percentage.\n\
         3. For each suspect, cite the chains marked * as the main evidence and explain the role.\n\
         4. Relations outside the tiers carry no weight; mention them only as context.\n\
         5. If the evidence is marked PARTIAL, say that some queries did not finish.\n\
         6. If the status is no_such_entity or no_evidence, say so plainly and stop.\n",
    );

    let rendered = bundle.render_text();
    let evidence = truncate_to_char_boundary(&rendered, evidence_budget);
    let mut input = String::from("[Evidence]\n");
    input.push_str(evidence);
    if evidence.len() < rendered.len() {
        input.push_str("\n... (evidence truncated)");
    }
    let _ = write!(input, "\n\n[Question]\n{}", bundle.question);

    NarrativePrompt { preamble, input }
}

/// Narrates through a chat model, `gpt-4o` unless configured otherwise.
pub struct LlmNarrator<A = OpenAi> {
    agent: A,
    taxonomy: Arc<RelationTaxonomy>,
    temperature: f32,
    max_tokens: u32,
    evidence_budget: usize,
}

impl<A: Agent> LlmNarrator<A> {
    pub fn new(agent: A, taxonomy: Arc<RelationTaxonomy>) -> Self {
        Self {
            agent,
            taxonomy,
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
            evidence_budget: DEFAULT_EVIDENCE_BUDGET,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_evidence_budget(mut self, bytes: usize) -> Self {
        self.evidence_budget = bytes;
        self
    }
}

#[async_trait]
impl<A: Agent + 'static> NarrativeRenderer for LlmNarrator<A> {
    async fn narrate(&self, bundle: &EvidenceBundle) -> Result<String> {
        let prompt = compose_prompt(&self.taxonomy, bundle, self.evidence_budget);
        if bundle.status != BundleStatus::Ranked {
            warn!(status = %bundle.status, "Narrating a bundle with no ranked suspects");
        }
        debug!(
            investigation = %bundle.id,
            preamble_bytes = prompt.preamble.len(),
            input_bytes = prompt.input.len(),
            "Composed narrative prompt"
        );

        let text = self
            .agent
            .prompt(prompt.input)
            .preamble(prompt.preamble)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .send()
            .await?;

        info!(investigation = %bundle.id, chars = text.len(), "Narrative rendered");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use noir_graph::testing::case_file;
    use noir_graph::{Investigator, RetrievalOptions};

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        preamble: Option<String>,
        input: String,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    }

    #[derive(Clone, Default)]
    struct RecordingAgent {
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    struct RecordingPrompt {
        sent: Arc<Mutex<Vec<Sent>>>,
        record: Sent,
    }

    impl Agent for RecordingAgent {
        type PromptBuilder = RecordingPrompt;

        fn prompt(&self, input: impl Into<String>) -> RecordingPrompt {
            RecordingPrompt {
                sent: self.sent.clone(),
                record: Sent {
                    preamble: None,
                    input: input.into(),
                    temperature: None,
                    max_tokens: None,
                },
            }
        }
    }

    #[async_trait]
    impl PromptBuilder for RecordingPrompt {
        fn preamble(mut self, preamble: impl Into<String>) -> Self {
            self.record.preamble = Some(preamble.into());
            self
        }

        fn temperature(mut self, temperature: f32) -> Self {
            self.record.temperature = Some(temperature);
            self
        }

        fn max_tokens(mut self, max_tokens: u32) -> Self {
            self.record.max_tokens = Some(max_tokens);
            self
        }

        async fn send(self) -> Result<String> {
            self.sent.lock().unwrap().push(self.record);
            Ok("Orlando Anderson pulled the trigger.".to_string())
        }
    }

    async fn tupac_bundle() -> EvidenceBundle {
        let investigator = Investigator::new(
            Arc::new(case_file()),
            Arc::new(RelationTaxonomy::builtin()),
            RetrievalOptions::default(),
        );
        investigator
            .run_investigation("Who killed Tupac?")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn prompt_carries_tiers_evidence_and_question() {
        let bundle = tupac_bundle().await;
        let prompt = compose_prompt(&RelationTaxonomy::builtin(), &bundle, DEFAULT_EVIDENCE_BUDGET);

        assert!(prompt.preamble.contains("- executor: "));
        assert!(prompt.preamble.contains("SHOT_AT (0.99)"));
        assert!(prompt.preamble.contains("BEEF_WITH (0.30)"));
        assert!(prompt.input.contains("Orlando Anderson -[:SHOT_AT]-> Tupac Shakur"));
        assert!(prompt.input.ends_with("[Question]\nWho killed Tupac?"));
        assert!(!prompt.input.contains("evidence truncated"));
    }

    #[tokio::test]
    async fn oversized_evidence_is_truncated() {
        let bundle = tupac_bundle().await;
        let prompt = compose_prompt(&RelationTaxonomy::builtin(), &bundle, 64);
        assert!(prompt.input.contains("(evidence truncated)"));
        assert!(prompt.input.ends_with("Who killed Tupac?"));
    }

    #[tokio::test]
    async fn no_such_entity_prompt_still_states_question() {
        let investigator = Investigator::new(
            Arc::new(case_file()),
            Arc::new(RelationTaxonomy::builtin()),
            RetrievalOptions::default(),
        );
        let bundle = investigator
            .run_investigation("Who killed Nonexistent Person?")
            .await
            .unwrap();
        let prompt = compose_prompt(&RelationTaxonomy::builtin(), &bundle, DEFAULT_EVIDENCE_BUDGET);
        assert!(prompt.input.contains("no_such_entity"));
        assert!(prompt.input.contains("Who killed Nonexistent Person?"));
    }

    #[tokio::test]
    async fn narrator_sends_one_prompt_with_configured_sampling() {
        let agent = RecordingAgent::default();
        let narrator = LlmNarrator::new(agent.clone(), Arc::new(RelationTaxonomy::builtin()))
            .with_temperature(0.2)
            .with_max_tokens(512);
        let bundle = tupac_bundle().await;

        let text = narrator.narrate(&bundle).await.unwrap();
        assert_eq!(text, "Orlando Anderson pulled the trigger.");

        let sent = agent.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let expected = compose_prompt(&RelationTaxonomy::builtin(), &bundle, DEFAULT_EVIDENCE_BUDGET);
        assert_eq!(sent[0].preamble.as_deref(), Some(expected.preamble.as_str()));
        assert_eq!(sent[0].input, expected.input);
        assert_eq!(sent[0].temperature, Some(0.2));
        assert_eq!(sent[0].max_tokens, Some(512));
    }
}
