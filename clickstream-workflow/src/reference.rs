//! Output references: string pointers to another stack's outputs.
//!
//! On the wire a reference is `<marker>.<StackName>.<Path>`:
//!
//! - `$.Stack.Outputs[0].OutputValue` evaluates `Outputs[0].OutputValue`
//!   against the stack's description.
//! - `#.Stack.Suffix` finds the output whose `OutputKey` ends with `Suffix`.
//!   CloudFormation appends generated prefixes to logical ids, so exact key
//!   matching would not work. If two keys share the suffix the first in
//!   `Outputs` order wins.
//!
//! Both kinds are evaluated against an output document, which is the
//! `{<StackName>: <description>}` object the callback bridge persists.
//! References are parsed into [`OutputReference`] as soon as they are read.

use serde_json::Value;

use crate::error::WorkflowError;

/// How a reference is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `$.`: a path into the stack description
    LivePath,
    /// `#.`: a suffix match against `Outputs[].OutputKey`
    PersistedSuffix,
}

impl ReferenceKind {
    fn marker(&self) -> char {
        match self {
            Self::LivePath => '$',
            Self::PersistedSuffix => '#',
        }
    }

    /// Splits a parameter key carrying a `.$` or `.#` suffix into the kind
    /// and the bare key.
    pub fn from_parameter_key(key: &str) -> Option<(Self, &str)> {
        if let Some(bare) = key.strip_suffix(".$") {
            Some((Self::LivePath, bare))
        } else {
            key.strip_suffix(".#")
                .map(|bare| (Self::PersistedSuffix, bare))
        }
    }
}

/// A parsed output reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputReference {
    pub kind: ReferenceKind,
    pub stack_name: String,
    pub path: String,
}

impl OutputReference {
    /// Parses `raw`. Returns `Ok(None)` for plain values that carry no
    /// reference marker.
    pub fn parse(raw: &str) -> Result<Option<Self>, WorkflowError> {
        let (kind, rest) = if let Some(rest) = raw.strip_prefix("$.") {
            (ReferenceKind::LivePath, rest)
        } else if let Some(rest) = raw.strip_prefix("#.") {
            (ReferenceKind::PersistedSuffix, rest)
        } else {
            return Ok(None);
        };

        let (stack_name, path) = rest
            .split_once('.')
            .ok_or_else(|| WorkflowError::invalid_reference(raw, "expected <StackName>.<Path>"))?;
        if stack_name.is_empty() {
            return Err(WorkflowError::invalid_reference(raw, "stack name is empty"));
        }
        if path.is_empty() {
            return Err(WorkflowError::invalid_reference(raw, "path is empty"));
        }
        if kind == ReferenceKind::LivePath {
            parse_path(path).map_err(|message| WorkflowError::invalid_reference(raw, message))?;
        }

        Ok(Some(Self {
            kind,
            stack_name: stack_name.to_string(),
            path: path.to_string(),
        }))
    }

    /// Parses `raw`, requiring a reference of `kind`.
    pub fn parse_as(kind: ReferenceKind, raw: &str) -> Result<Self, WorkflowError> {
        match Self::parse(raw)? {
            Some(reference) if reference.kind == kind => Ok(reference),
            _ => Err(WorkflowError::invalid_reference(
                raw,
                format!("expected a value starting with '{}.'", kind.marker()),
            )),
        }
    }

    /// Evaluates this reference against an output document.
    ///
    /// Returns `None` when the stack, path or output key is absent, or when
    /// the target is null.
    pub fn evaluate(&self, document: &Value) -> Option<String> {
        let description = document.get(&self.stack_name)?;
        let target = match self.kind {
            ReferenceKind::LivePath => {
                let segments = parse_path(&self.path).ok()?;
                walk(description, &segments)?
            }
            ReferenceKind::PersistedSuffix => description
                .get("Outputs")?
                .as_array()?
                .iter()
                .find(|output| {
                    output
                        .get("OutputKey")
                        .and_then(Value::as_str)
                        .is_some_and(|key| key.ends_with(self.path.as_str()))
                })?
                .get("OutputValue")?,
        };
        scalar_to_string(target)
    }
}

impl std::fmt::Display for OutputReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.kind.marker(), self.stack_name, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Parses `Outputs[0].OutputValue` style paths.
fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (field, mut indices) = match part.find('[') {
            Some(open) => part.split_at(open),
            None => (part, ""),
        };
        if field.is_empty() && indices.is_empty() {
            return Err(format!("empty segment in '{}'", path));
        }
        if !field.is_empty() {
            segments.push(Segment::Field(field.to_string()));
        }
        while !indices.is_empty() {
            let close = indices
                .find(']')
                .ok_or_else(|| format!("unclosed '[' in '{}'", part))?;
            let index = indices[1..close]
                .parse::<usize>()
                .map_err(|_| format!("invalid index in '{}'", part))?;
            segments.push(Segment::Index(index));
            indices = &indices[close + 1..];
            if !indices.is_empty() && !indices.starts_with('[') {
                return Err(format!("unexpected '{}' in '{}'", indices, part));
            }
        }
    }
    Ok(segments)
}

fn walk<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Field(name) => current.get(name.as_str()),
        Segment::Index(index) => current.get(*index),
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "Clickstream-ServiceCatalogAppRegistry": {
                "StackName": "Clickstream-ServiceCatalogAppRegistry",
                "StackStatus": "CREATE_COMPLETE",
                "Outputs": [
                    {
                        "OutputKey": "xxxxxxxxxServiceCatalogAppRegistryApplicationTagKey",
                        "OutputValue": "awsApplication"
                    },
                    {
                        "OutputKey": "xxxxxxxxxServiceCatalogAppRegistryApplicationTagValue",
                        "OutputValue": "arn:aws:servicecatalog:us-east-1:111122223333:/applications/abc"
                    }
                ]
            }
        })
    }

    #[test]
    fn test_parse_plain_value() {
        assert_eq!(OutputReference::parse("plain-value").unwrap(), None);
        assert_eq!(OutputReference::parse("").unwrap(), None);
    }

    #[test]
    fn test_parse_live_path() {
        let reference = OutputReference::parse("$.Clickstream-Ingestion.Outputs[0].OutputValue")
            .unwrap()
            .unwrap();
        assert_eq!(reference.kind, ReferenceKind::LivePath);
        assert_eq!(reference.stack_name, "Clickstream-Ingestion");
        assert_eq!(reference.path, "Outputs[0].OutputValue");
        assert_eq!(reference.to_string(), "$.Clickstream-Ingestion.Outputs[0].OutputValue");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(OutputReference::parse("#.StackOnly").is_err());
        assert!(OutputReference::parse("#..Suffix").is_err());
        assert!(OutputReference::parse("$.Stack.Outputs[x]").is_err());
        assert!(OutputReference::parse("$.Stack.Outputs[0").is_err());
    }

    #[test]
    fn test_parse_as_requires_matching_marker() {
        assert!(OutputReference::parse_as(ReferenceKind::LivePath, "#.S.Key").is_err());
        assert!(OutputReference::parse_as(ReferenceKind::PersistedSuffix, "value").is_err());
        assert!(OutputReference::parse_as(ReferenceKind::PersistedSuffix, "#.S.Key").is_ok());
    }

    #[test]
    fn test_parameter_key_suffix() {
        assert_eq!(
            ReferenceKind::from_parameter_key("AppRegistryArn.#"),
            Some((ReferenceKind::PersistedSuffix, "AppRegistryArn"))
        );
        assert_eq!(
            ReferenceKind::from_parameter_key("Endpoint.$"),
            Some((ReferenceKind::LivePath, "Endpoint"))
        );
        assert_eq!(ReferenceKind::from_parameter_key("Endpoint"), None);
    }

    #[test]
    fn test_suffix_match() {
        let reference = OutputReference::parse(
            "#.Clickstream-ServiceCatalogAppRegistry.ServiceCatalogAppRegistryApplicationTagValue",
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            reference.evaluate(&document()).as_deref(),
            Some("arn:aws:servicecatalog:us-east-1:111122223333:/applications/abc")
        );
    }

    #[test]
    fn test_live_path() {
        let reference =
            OutputReference::parse("$.Clickstream-ServiceCatalogAppRegistry.Outputs[1].OutputKey")
                .unwrap()
                .unwrap();
        assert_eq!(
            reference.evaluate(&document()).as_deref(),
            Some("xxxxxxxxxServiceCatalogAppRegistryApplicationTagValue")
        );
    }

    #[test]
    fn test_misses_evaluate_to_none() {
        let missing_key = OutputReference::parse("#.Clickstream-ServiceCatalogAppRegistry.Nope")
            .unwrap()
            .unwrap();
        assert_eq!(missing_key.evaluate(&document()), None);

        let missing_stack = OutputReference::parse("#.Other.ApplicationTagValue").unwrap().unwrap();
        assert_eq!(missing_stack.evaluate(&document()), None);

        let empty_description = OutputReference::parse("$.Gone.Outputs[0].OutputValue")
            .unwrap()
            .unwrap();
        assert_eq!(empty_description.evaluate(&json!({"Gone": {}})), None);
    }

    #[test]
    fn test_non_string_targets() {
        let doc = json!({"S": {"Count": 3, "Enabled": true, "Nested": {"a": 1}, "Null": null}});
        let eval = |path: &str| {
            OutputReference::parse(&format!("$.S.{}", path))
                .unwrap()
                .unwrap()
                .evaluate(&doc)
        };
        assert_eq!(eval("Count").as_deref(), Some("3"));
        assert_eq!(eval("Enabled").as_deref(), Some("true"));
        assert_eq!(eval("Nested").as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(eval("Null"), None);
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(raw in "\\PC*") {
            let _ = OutputReference::parse(&raw);
        }

        #[test]
        fn prop_indexed_path_selects_output(
            stack in "[A-Za-z][A-Za-z0-9-]{0,20}",
            values in prop::collection::vec("[a-z0-9:/-]{1,30}", 1..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let index = pick.index(values.len());
            let outputs: Vec<Value> = values
                .iter()
                .enumerate()
                .map(|(i, value)| json!({"OutputKey": format!("Key{}", i), "OutputValue": value}))
                .collect();
            let doc = json!({ stack.clone(): { "Outputs": outputs } });

            let reference = OutputReference::parse(&format!("$.{}.Outputs[{}].OutputValue", stack, index))
                .unwrap()
                .unwrap();
            prop_assert_eq!(reference.evaluate(&doc), Some(values[index].clone()));
        }

        #[test]
        fn prop_suffix_matches_prefixed_keys(
            prefix in "[a-z0-9]{0,12}",
            suffix in "[A-Z][A-Za-z]{1,20}",
            value in "[a-z0-9]{1,20}",
        ) {
            let doc = json!({"S": {"Outputs": [
                {"OutputKey": format!("{}{}", prefix, suffix), "OutputValue": value}
            ]}});
            let reference = OutputReference::parse(&format!("#.S.{}", suffix)).unwrap().unwrap();
            prop_assert_eq!(reference.evaluate(&doc), Some(value));
        }
    }
}
