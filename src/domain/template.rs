//! Launch templates: a named config path with defaults and a survey.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{ControlError, Result};

/// A question asked when launching a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    /// Answer key
    pub variable: String,

    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub required: bool,
}

/// A resolved launch template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// `tpl-<N>`
    pub id: String,

    pub name: String,

    /// Config path applied when the template is launched
    pub config_path: String,

    /// Default answers
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,

    #[serde(default)]
    pub survey: Vec<SurveyQuestion>,

    pub created_at: DateTime<Utc>,
}

impl Template {
    /// Merge caller answers over the defaults and check required questions.
    pub fn validate_answers(
        &self,
        answers: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut merged = self.defaults.clone();
        merged.extend(answers.iter().map(|(k, v)| (k.clone(), v.clone())));

        for question in self.survey.iter().filter(|q| q.required) {
            let answered = merged
                .get(&question.variable)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !answered {
                return Err(ControlError::InvalidInput(format!(
                    "template {} requires survey answer '{}'",
                    self.id, question.variable
                )));
            }
        }

        Ok(merged)
    }
}

/// Input for creating a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub config_path: String,

    #[serde(default)]
    pub defaults: BTreeMap<String, String>,

    #[serde(default)]
    pub survey: Vec<SurveyQuestion>,
}
