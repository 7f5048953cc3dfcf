//! Endpoint template rendering.
//!
//! Templates look like `/characters/{character_id}/assets/`. Parameters that
//! fill a placeholder are consumed by the path; the rest become query
//! parameters.

use std::collections::BTreeMap;

use serde_json::Value;

use super::EsiError;

/// Placeholder names in a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if !name.is_empty() {
            names.push(name);
        }
        rest = &after[end + 1..];
    }
    names
}

/// Render a parameter value for use in a path segment or query string.
///
/// Arrays become comma-separated lists; `null` renders as nothing.
pub fn param_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(param_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Fill placeholders and split off the remaining query parameters.
pub fn render(
    template: &str,
    parameters: &BTreeMap<String, Value>,
) -> Result<(String, Vec<(String, String)>), EsiError> {
    let names = placeholders(template);
    let mut path = template.to_string();

    for name in &names {
        let value = parameters
            .get(*name)
            .and_then(param_to_string)
            .ok_or_else(|| EsiError::Template(format!("no value for placeholder {{{name}}}")))?;
        path = path.replace(&format!("{{{name}}}"), &value);
    }

    let query = parameters
        .iter()
        .filter(|(key, _)| !names.contains(&key.as_str()))
        .filter_map(|(key, value)| param_to_string(value).map(|v| (key.clone(), v)))
        .collect();

    Ok((path, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("/characters/{character_id}/wallet/journal/{page}"),
            vec!["character_id", "page"]
        );
        assert!(placeholders("/sovereignty/map/").is_empty());
        assert!(placeholders("/broken/{id").is_empty());
    }

    #[test]
    fn test_render_path_and_query() {
        let (path, query) = render(
            "/markets/{region_id}/orders/",
            &params(json!({"region_id": 10000002, "order_type": "sell", "type_id": 34})),
        )
        .unwrap();

        assert_eq!(path, "/markets/10000002/orders/");
        assert_eq!(
            query,
            vec![
                ("order_type".to_string(), "sell".to_string()),
                ("type_id".to_string(), "34".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_missing_placeholder() {
        let err = render("/corporations/{corporation_id}/", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EsiError::Template(_)));
    }

    #[test]
    fn test_array_parameters_join() {
        assert_eq!(
            param_to_string(&json!([30000142, 30002187])).as_deref(),
            Some("30000142,30002187")
        );
        assert_eq!(param_to_string(&Value::Null), None);
    }
}
