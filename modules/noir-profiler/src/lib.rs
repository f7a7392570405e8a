pub mod narrator;

pub use narrator::{compose_prompt, LlmNarrator, NarrativePrompt, NarrativeRenderer};

use noir_common::{NoirError, RelationTaxonomy};
use tracing::info;

/// The taxonomy at `path`, or the builtin table when none is configured.
pub fn load_taxonomy(path: Option<&str>) -> Result<RelationTaxonomy, NoirError> {
    match path {
        Some(path) => {
            let taxonomy = RelationTaxonomy::load(path)?;
            info!(path, relations = taxonomy.len(), "Loaded relation taxonomy");
            Ok(taxonomy)
        }
        None => Ok(RelationTaxonomy::builtin()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noir_common::RoleClass;

    #[test]
    fn missing_path_falls_back_to_builtin() {
        assert_eq!(load_taxonomy(None).unwrap(), RelationTaxonomy::builtin());
    }

    #[test]
    fn configured_file_replaces_builtin() {
        let path = std::env::temp_dir().join(format!("noir-taxonomy-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"relations":[{"relation":"POISONED","role":"executor","weight":0.9}]}"#,
        )
        .unwrap();

        let taxonomy = load_taxonomy(path.to_str()).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(taxonomy.len(), 1);
        assert_eq!(taxonomy.role("POISONED"), Some(RoleClass::Executor));
        assert_eq!(taxonomy.weight("SHOT_AT"), 0.0);
    }

    #[test]
    fn unreadable_file_is_a_taxonomy_error() {
        let err = load_taxonomy(Some("/nonexistent/noir-taxonomy.json")).unwrap_err();
        assert!(matches!(err, NoirError::Taxonomy(_)));
    }
}
