//! Pipeline builder with contract validation.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::stage::Stage;
use crate::errors::{ContractErrorInfo, ContractSuggestions, PipelineValidationError};

/// Field the assembler reads the generated document from by default.
pub const DEFAULT_DOCUMENT_KEY: &str = "document";

/// A validated, ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    seed_keys: BTreeSet<String>,
    document_key: Option<String>,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name().to_string()).collect()
    }

    /// Keys the initial context is expected to provide.
    #[must_use]
    pub fn seed_keys(&self) -> &BTreeSet<String> {
        &self.seed_keys
    }

    /// Field holding the document to assemble, or `None` if the pipeline
    /// ends without assembly.
    #[must_use]
    pub fn document_key(&self) -> Option<&str> {
        self.document_key.as_deref()
    }
}

/// Builds a [`Pipeline`], rejecting wiring mistakes before anything runs.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    seed_keys: BTreeSet<String>,
    written: BTreeSet<String>,
    document_key: Option<String>,
}

impl PipelineBuilder {
    /// Creates a builder whose pipeline assembles the `document` field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            seed_keys: BTreeSet::new(),
            written: BTreeSet::new(),
            document_key: Some(DEFAULT_DOCUMENT_KEY.to_string()),
        }
    }

    /// Declares keys the initial context will provide.
    #[must_use]
    pub fn with_seed_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Assembles `key` instead of the default document field.
    #[must_use]
    pub fn with_document_key(mut self, key: impl Into<String>) -> Self {
        self.document_key = Some(key.into());
        self
    }

    /// Ends the pipeline after the last stage without assembly.
    #[must_use]
    pub fn without_assembly(mut self) -> Self {
        self.document_key = None;
        self
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or a declared read is neither a
    /// seed key nor written by an earlier stage.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Result<Self, PipelineValidationError> {
        let name = stage.name().to_string();
        if self.stages.iter().any(|existing| existing.name() == name) {
            return Err(contract_error(
                "CONTRACT-001-DUPLICATE",
                format!("Duplicate stage name '{name}'"),
                vec![name],
            ));
        }

        let contract = stage.contract();
        if let Some(missing) = contract
            .reads
            .iter()
            .find(|key| !self.seed_keys.contains(*key) && !self.written.contains(*key))
        {
            return Err(contract_error(
                "CONTRACT-002-UNSATISFIED_READ",
                format!("Stage '{name}' reads '{missing}', which no earlier stage writes"),
                vec![name.clone()],
            )
            .with_error_info(
                info_for("CONTRACT-002-UNSATISFIED_READ", "Read not satisfied")
                    .with_context_entry("stage", name.clone())
                    .with_context_entry("field", missing.clone()),
            ));
        }

        self.written.extend(contract.writes.iter().cloned());
        self.stages.push(stage);
        Ok(self)
    }

    /// Number of stages so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Finishes the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no stages or nothing provides the
    /// document field.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(contract_error(
                "CONTRACT-003-EMPTY",
                format!("Pipeline '{}' has no stages", self.name),
                Vec::new(),
            ));
        }

        if let Some(key) = &self.document_key {
            if !self.written.contains(key) && !self.seed_keys.contains(key) {
                return Err(contract_error(
                    "CONTRACT-004-DOCUMENT_SOURCE",
                    format!("No stage writes the document field '{key}'"),
                    Vec::new(),
                ));
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            seed_keys: self.seed_keys,
            document_key: self.document_key,
        })
    }
}

fn info_for(code: &str, summary: &str) -> ContractErrorInfo {
    let info = ContractErrorInfo::new(code, summary);
    match ContractSuggestions::get(code) {
        Some(hint) => info.with_fix_hint(hint),
        None => info,
    }
}

fn contract_error(code: &str, message: String, stages: Vec<String>) -> PipelineValidationError {
    PipelineValidationError::new(message.clone())
        .with_stages(stages)
        .with_error_info(info_for(code, &message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageContract;
    use crate::testing::StaticStage;

    fn stage(name: &str, contract: StageContract) -> Arc<dyn Stage> {
        Arc::new(StaticStage::new(name).with_contract(contract))
    }

    #[test]
    fn test_builds_valid_chain() {
        let pipeline = PipelineBuilder::new("landing")
            .with_seed_keys(["keyword"])
            .stage(stage("outline", StageContract::new().reads(["keyword"]).writes(["outline"])))
            .unwrap()
            .stage(stage("body", StageContract::new().reads(["outline"]).writes(["document"])))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "landing");
        assert_eq!(pipeline.stage_names(), vec!["outline", "body"]);
        assert_eq!(pipeline.document_key(), Some("document"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(stage("a", StageContract::new().writes(["document"])))
            .unwrap()
            .stage(stage("a", StageContract::new()))
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-001-DUPLICATE"));
        assert_eq!(err.stages, vec!["a".to_string()]);
    }

    #[test]
    fn test_read_from_later_stage_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(stage("early", StageContract::new().reads(["outline"])))
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-002-UNSATISFIED_READ"));
        let info = err.error_info.unwrap();
        assert_eq!(info.context.get("field").map(String::as_str), Some("outline"));
        assert!(info.fix_hint.is_some());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("p").build().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-003-EMPTY"));
    }

    #[test]
    fn test_missing_document_source_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(stage("a", StageContract::new().writes(["outline"])))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DOCUMENT_SOURCE"));

        assert!(PipelineBuilder::new("p")
            .with_seed_keys(["document"])
            .stage(stage("a", StageContract::new()))
            .unwrap()
            .build()
            .is_ok());
        assert!(PipelineBuilder::new("p")
            .without_assembly()
            .stage(stage("a", StageContract::new().writes(["outline"])))
            .unwrap()
            .build()
            .is_ok());
    }
}
