//! Launch template registry.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use crate::domain::{NewTemplate, Template};

use super::error::{parse_seq, ControlError, Result};

/// Resolves template IDs for the workflow engine and the host
pub trait TemplateRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Template>;
}

/// In-memory template store
#[derive(Default)]
pub struct TemplateStore {
    inner: RwLock<TemplateState>,
}

#[derive(Default)]
struct TemplateState {
    next_seq: u64,
    templates: BTreeMap<u64, Template>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, input: NewTemplate) -> Result<Template> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ControlError::invalid("template name is required"));
        }
        let config_path = input.config_path.trim();
        if config_path.is_empty() {
            return Err(ControlError::invalid("template config path is required"));
        }
        if input.survey.iter().any(|q| q.variable.trim().is_empty()) {
            return Err(ControlError::invalid("survey questions need a variable"));
        }

        let mut state = self.inner.write();
        state.next_seq += 1;
        let template = Template {
            id: format!("tpl-{}", state.next_seq),
            name: name.to_string(),
            config_path: config_path.to_string(),
            defaults: input.defaults,
            survey: input.survey,
            created_at: Utc::now(),
        };
        let seq = state.next_seq;
        state.templates.insert(seq, template.clone());

        info!(template_id = %template.id, config_path = %template.config_path, "Template created");
        Ok(template)
    }

    pub fn list(&self) -> Vec<Template> {
        self.inner.read().templates.values().cloned().collect()
    }
}

impl TemplateRegistry for TemplateStore {
    fn get(&self, id: &str) -> Option<Template> {
        let seq = parse_seq(id, "tpl")?;
        self.inner.read().templates.get(&seq).cloned()
    }
}
