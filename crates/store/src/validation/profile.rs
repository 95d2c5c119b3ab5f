//! StructureDefinition rules.
//!
//! A profile is reduced to one [`ElementRule`] per constrained element path:
//! its cardinality and, for required bindings, the value set its codes must
//! come from. Sliced elements are not evaluated.

use serde_json::Value;

use crate::outcome::{Issue, IssueType, OperationOutcome};
use crate::search::extractor::is_choice_variant;

/// Cardinality and binding of one element path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRule {
    /// Full element path, e.g. `Observation.subject`.
    pub path: String,
    /// Path segments between the root and the element.
    parent: Vec<String>,
    /// Last path segment, possibly a `[x]` choice name.
    name: String,
    /// Minimum occurrences within each parent.
    pub min: u32,
    /// Maximum occurrences within each parent; `None` for `*`.
    pub max: Option<u32>,
    /// Value set of a required binding.
    pub value_set: Option<String>,
}

/// Codes found at an element with a required binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundValue {
    /// Expression locating the value, e.g. `Observation.status`.
    pub expression: String,
    /// Canonical URL of the bound value set.
    pub value_set: String,
    /// `(system, code)` pairs; the value is valid if any pair is a member.
    pub codings: Vec<(Option<String>, String)>,
}

/// The checkable content of a StructureDefinition.
#[derive(Debug, Clone)]
pub struct StructureProfile {
    url: String,
    type_name: String,
    rules: Vec<ElementRule>,
}

impl StructureProfile {
    /// Reads the element rules from a StructureDefinition resource. The
    /// snapshot is used when present, else the differential.
    pub fn parse(definition: &Value) -> Result<Self, String> {
        let url = definition
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "StructureDefinition has no url".to_string())?;

        let elements = ["snapshot", "differential"]
            .iter()
            .find_map(|key| {
                definition
                    .get(*key)
                    .and_then(|v| v.get("element"))
                    .and_then(|v| v.as_array())
            })
            .ok_or_else(|| format!("StructureDefinition '{}' has no elements", url))?;

        let type_name = definition
            .get("type")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| {
                elements
                    .first()
                    .and_then(|e| e.get("path"))
                    .and_then(|p| p.as_str())
                    .map(|p| p.split('.').next().unwrap_or(p).to_string())
            })
            .ok_or_else(|| format!("StructureDefinition '{}' has no type", url))?;

        let rules = elements.iter().filter_map(ElementRule::from_element).collect();

        Ok(Self {
            url: url.to_string(),
            type_name,
            rules,
        })
    }

    /// Returns the profile's canonical URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the resource type the profile constrains.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the element rules.
    pub fn rules(&self) -> &[ElementRule] {
        &self.rules
    }

    /// Checks every cardinality rule, adding one error per violation.
    pub fn check_cardinality(&self, resource: &Value, outcome: &mut OperationOutcome) {
        for rule in &self.rules {
            for parent in locate(resource, &rule.parent) {
                let found = count_children(parent.node, &rule.name);

                if found < rule.min as usize {
                    outcome.push(
                        Issue::error(
                            IssueType::Structure,
                            min_message(&parent.context, &rule.name, rule.min, found),
                        )
                        .with_expression(rule.path.clone()),
                    );
                }
                if let Some(max) = rule.max {
                    if found > max as usize {
                        outcome.push(
                            Issue::error(
                                IssueType::Structure,
                                format!(
                                    "Element {} @ {}: max allowed = {}, but found {}",
                                    rule.name, parent.context, max, found
                                ),
                            )
                            .with_expression(rule.path.clone()),
                        );
                    }
                }
            }
        }
    }

    /// Collects the codes present at every element with a required binding.
    pub fn bound_values(&self, resource: &Value) -> Vec<BoundValue> {
        let mut values = Vec::new();
        for rule in &self.rules {
            let Some(value_set) = &rule.value_set else {
                continue;
            };
            for parent in locate(resource, &rule.parent) {
                for node in children(parent.node, &rule.name) {
                    let codings = codings_of(node);
                    if !codings.is_empty() {
                        values.push(BoundValue {
                            expression: rule.path.clone(),
                            value_set: value_set.clone(),
                            codings,
                        });
                    }
                }
            }
        }
        values
    }
}

impl ElementRule {
    fn from_element(element: &Value) -> Option<Self> {
        if element.get("sliceName").is_some() {
            return None;
        }
        let path = element.get("path")?.as_str()?;
        if path.contains(':') {
            return None;
        }

        let mut segments: Vec<String> = path.split('.').skip(1).map(String::from).collect();
        // The root element carries no cardinality of interest
        let name = segments.pop()?;

        // A minimum that is not a u32 makes the element unusable
        let min = match element.get("min") {
            Some(min) => u32::try_from(min.as_u64()?).ok()?,
            None => 0,
        };
        let max = element
            .get("max")
            .and_then(|v| v.as_str())
            .and_then(|m| m.parse::<u32>().ok());
        let value_set = element.get("binding").and_then(|binding| {
            if binding.get("strength").and_then(|s| s.as_str()) != Some("required") {
                return None;
            }
            binding
                .get("valueSet")
                .or_else(|| binding.get("valueSetUri"))
                .or_else(|| binding.get("valueSetReference").and_then(|r| r.get("reference")))
                .and_then(|v| v.as_str())
                .map(String::from)
        });

        if min == 0 && max.is_none() && value_set.is_none() {
            return None;
        }

        Some(Self {
            path: path.to_string(),
            parent: segments,
            name,
            min,
            max,
            value_set,
        })
    }
}

/// Message for a minimum-cardinality violation.
pub(crate) fn min_message(context: &str, name: &str, min: u32, found: usize) -> String {
    format!(
        "Element '{}.{}': minimum required = {}, but only found {}",
        context, name, min, found
    )
}

/// A node together with its location, e.g. `.component[1]`.
struct Located<'a> {
    node: &'a Value,
    context: String,
}

fn locate<'a>(resource: &'a Value, segments: &[String]) -> Vec<Located<'a>> {
    let mut current = vec![Located {
        node: resource,
        context: String::new(),
    }];

    for segment in segments {
        let mut next = Vec::new();
        for located in &current {
            let Value::Object(obj) = located.node else {
                continue;
            };
            for (key, value) in obj {
                if !matches_name(key, segment) {
                    continue;
                }
                match value {
                    Value::Array(items) => {
                        for (i, item) in items.iter().enumerate() {
                            next.push(Located {
                                node: item,
                                context: format!("{}.{}[{}]", located.context, key, i),
                            });
                        }
                    }
                    Value::Null => {}
                    other => next.push(Located {
                        node: other,
                        context: format!("{}.{}", located.context, key),
                    }),
                }
            }
        }
        current = next;
    }

    current
}

fn matches_name(key: &str, name: &str) -> bool {
    match name.strip_suffix("[x]") {
        Some(prefix) => is_choice_variant(key, prefix),
        None => key == name,
    }
}

fn children<'a>(node: &'a Value, name: &str) -> Vec<&'a Value> {
    let Value::Object(obj) = node else {
        return Vec::new();
    };
    obj.iter()
        .filter(|(key, _)| matches_name(key, name))
        .flat_map(|(_, value)| match value {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            Value::Null => Vec::new(),
            other => vec![other],
        })
        .collect()
}

/// Counts the occurrences of an element within one parent.
pub(crate) fn count_children(node: &Value, name: &str) -> usize {
    children(node, name).len()
}

fn codings_of(node: &Value) -> Vec<(Option<String>, String)> {
    let coding = |c: &Value| {
        c.get("code").and_then(|v| v.as_str()).map(|code| {
            (
                c.get("system").and_then(|v| v.as_str()).map(String::from),
                code.to_string(),
            )
        })
    };

    match node {
        Value::String(code) => vec![(None, code.clone())],
        Value::Object(obj) => match obj.get("coding").and_then(|v| v.as_array()) {
            Some(codings) => codings.iter().filter_map(coding).collect(),
            None => coding(node).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}
