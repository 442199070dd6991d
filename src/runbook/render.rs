//! Placeholder substitution for block bodies.
//!
//! Only two expression forms are substituted:
//! - `{{ .Name }}` from the runbook variables
//! - `{{ ._blocks.B.outputs.O }}` from the output registry
//!
//! Any other `{{ ... }}` expression is left as written.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::core::OutputRegistry;
use crate::deps::normalize_block_id;
use crate::error::RenderError;

static EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{-?\s*(.*?)\s*-?\}\}").expect("expression pattern is valid"));

static OUTPUT_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.?_blocks\.([A-Za-z0-9_-]+)\.outputs\.(\w+)\s*(?:\|.*)?$")
        .expect("output pattern is valid")
});

static VARIABLE_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.([A-Za-z_]\w*)$").expect("variable pattern is valid"));

enum Expression<'a> {
    Output { block: &'a str, output: &'a str },
    Variable(&'a str),
    Other,
}

fn classify(expr: &str) -> Expression<'_> {
    if let Some(caps) = OUTPUT_EXPR.captures(expr) {
        let (Some(block), Some(output)) = (caps.get(1), caps.get(2)) else {
            return Expression::Other;
        };
        return Expression::Output { block: block.as_str(), output: output.as_str() };
    }
    if let Some(name) = VARIABLE_EXPR.captures(expr).and_then(|c| c.get(1)) {
        if name.as_str() != "_blocks" {
            return Expression::Variable(name.as_str());
        }
    }
    Expression::Other
}

/// Substitute variables and block outputs into a body.
pub fn render(
    body: &str,
    variables: &HashMap<String, String>,
    registry: &OutputRegistry,
) -> Result<String, RenderError> {
    let outputs = registry.template_outputs();
    let mut error = None;

    let rendered = EXPRESSION.replace_all(body, |caps: &Captures| {
        let whole = caps[0].to_string();
        match classify(caps.get(1).map_or("", |m| m.as_str())) {
            Expression::Output { block, output } => {
                match outputs.get(&normalize_block_id(block)).and_then(|o| o.get(output)) {
                    Some(value) => value.clone(),
                    None => {
                        error.get_or_insert(RenderError::MissingOutput {
                            block: block.to_string(),
                            output: output.to_string(),
                        });
                        whole
                    }
                }
            }
            Expression::Variable(name) => match variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    error.get_or_insert(RenderError::MissingVariable(name.to_string()));
                    whole
                }
            },
            Expression::Other => whole,
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

/// Names of the `{{ .Name }}` variables used in a body, distinct, in first-seen order.
pub fn variable_names(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EXPRESSION
        .captures_iter(body)
        .filter_map(|caps| match classify(caps.get(1)?.as_str()) {
            Expression::Variable(name) => Some(name.to_string()),
            _ => None,
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
