//! System instruction rendering

use crate::config::{PromptOptions, Specialization};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder pattern is valid"));

/// Substitute `{{name}}` placeholders; unknown names are left as written
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Variables available to every template of a turn
pub fn turn_variables(
    options: &PromptOptions,
    specialization: Option<&Specialization>,
    now: DateTime<Utc>,
) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("knowledgeCutoff", options.knowledge_cutoff_date.clone());
    vars.insert("currentDate", now.format("%A, %B %d, %Y").to_string());
    vars.insert(
        "specialization",
        specialization.map(|s| s.name.clone()).unwrap_or_default(),
    );
    vars
}

/// Fixed system instructions for a turn
pub fn render_system_instructions(
    options: &PromptOptions,
    specialization: Option<&Specialization>,
    now: DateTime<Utc>,
) -> String {
    let vars = turn_variables(options, specialization, now);

    let mut sections = vec![render_template(&options.system_description, &vars)];
    if let Some(role) = specialization.map(|s| s.role_information.trim()).filter(|r| !r.is_empty()) {
        sections.push(render_template(role, &vars));
    }
    sections.push(render_template(&options.system_response, &vars));

    sections.join("\n")
}
