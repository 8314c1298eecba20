// Accessors for ComfyUI workflow documents.
//
// A workflow stays a serde_json::Value throughout; the graph schema is too
// loose for typed deserialization (node titles are optional, positions come
// in two encodings, widget lists are heterogeneous). Only groups are rigid
// enough for a derive.

use serde::Deserialize;
use serde_json::Value;

/// LiteGraph node modes. Everything other than ALWAYS counts as "not enabled".
pub const MODE_ALWAYS: u64 = 0;
pub const MODE_BYPASS: u64 = 4;

/// A named rectangular region of the graph canvas.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub title: String,
    pub bounding: [f64; 4],
}

impl Group {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let [gx, gy, gw, gh] = self.bounding;
        x >= gx && x <= gx + gw && y >= gy && y <= gy + gh
    }
}

/// First group with the given title, in document order.
pub fn find_group(workflow: &Value, title: &str) -> Option<Group> {
    workflow
        .get("groups")?
        .as_array()?
        .iter()
        .filter_map(|g| serde_json::from_value::<Group>(g.clone()).ok())
        .find(|g| g.title == title)
}

fn nodes(workflow: &Value) -> &[Value] {
    workflow
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn node_title(node: &Value) -> &str {
    node.get("title").and_then(Value::as_str).unwrap_or("")
}

/// Node position. Either a `[x, y]` array or a `{"0": x, "1": y}` object;
/// both encodings occur in saved workflows.
pub fn node_pos(node: &Value) -> Option<(f64, f64)> {
    let pos = node.get("pos")?;
    match pos {
        Value::Array(a) => Some((a.first()?.as_f64()?, a.get(1)?.as_f64()?)),
        Value::Object(o) => Some((o.get("0")?.as_f64()?, o.get("1")?.as_f64()?)),
        _ => None,
    }
}

/// First node with the exact title, in document order. Titles are not
/// guaranteed unique; first match wins by contract.
pub fn find_node<'w>(workflow: &'w Value, title: &str) -> Option<&'w Value> {
    nodes(workflow).iter().find(|n| node_title(n) == title)
}

/// First node of the given type. When `title_contains` is set, the node's
/// title must also contain that substring (case-insensitive).
pub fn find_node_by_type<'w>(
    workflow: &'w Value,
    node_type: &str,
    title_contains: Option<&str>,
) -> Option<&'w Value> {
    let node_type = node_type.to_lowercase();
    let needle = title_contains.map(str::to_lowercase);
    nodes(workflow).iter().find(|n| {
        let matches_type = n
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.to_lowercase() == node_type)
            .unwrap_or(false);
        let matches_title = needle
            .as_ref()
            .map(|needle| node_title(n).to_lowercase().contains(needle))
            .unwrap_or(true);
        matches_type && matches_title
    })
}

/// Whether the node with the given title is enabled (mode == ALWAYS).
/// Returns None when the node is missing or carries no mode at all.
pub fn is_node_enabled(workflow: &Value, title: &str) -> Option<bool> {
    let node = find_node(workflow, title)?;
    Some(node.get("mode")?.as_u64()? == MODE_ALWAYS)
}

/// First widget value of a node, when it is a string.
pub fn widget_text(node: &Value) -> Option<&str> {
    node.get("widgets_values")?.as_array()?.first()?.as_str()
}

/// Replaces widget value 0, creating a one-element list when the node has no
/// widget list (or a non-list one).
pub fn set_widget_text(node: &mut Value, text: &str) {
    match node.get_mut("widgets_values").and_then(Value::as_array_mut) {
        Some(values) if !values.is_empty() => values[0] = Value::String(text.to_owned()),
        _ => {
            node["widgets_values"] = serde_json::json!([text]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "nodes": [
                {"id": 1, "title": "PROMPT", "type": "Note", "pos": [100, 200],
                 "mode": 0, "widgets_values": ["a cat"]},
                {"id": 2, "title": "PROMPT", "type": "Note", "pos": {"0": 5, "1": 6},
                 "mode": 4},
                {"id": 3, "type": "Node Collector (rgthree)", "title": "style hub",
                 "pos": [0, 0], "inputs": []},
            ],
            "groups": [
                {"title": "STYLES", "bounding": [0.0, 0.0, 400.0, 600.0]},
                {"title": "STYLES", "bounding": [9.0, 9.0, 1.0, 1.0]}
            ]
        })
    }

    #[test]
    fn test_first_match_wins() {
        let wf = sample();
        let node = find_node(&wf, "PROMPT").unwrap();
        assert_eq!(node["id"], 1);
        let group = find_group(&wf, "STYLES").unwrap();
        assert_eq!(group.bounding, [0.0, 0.0, 400.0, 600.0]);
    }

    #[test]
    fn test_both_pos_encodings() {
        let wf = sample();
        assert_eq!(node_pos(&wf["nodes"][0]), Some((100.0, 200.0)));
        assert_eq!(node_pos(&wf["nodes"][1]), Some((5.0, 6.0)));
    }

    #[test]
    fn test_find_by_type_with_title_filter() {
        let wf = sample();
        let node = find_node_by_type(&wf, "node collector (rgthree)", Some("STYLE"));
        assert_eq!(node.unwrap()["id"], 3);
        assert!(find_node_by_type(&wf, "node collector (rgthree)", Some("nope")).is_none());
    }

    #[test]
    fn test_enabled_flag() {
        let wf = sample();
        assert_eq!(is_node_enabled(&wf, "PROMPT"), Some(true));
        assert_eq!(is_node_enabled(&wf, "style hub"), None); // no mode field
        assert_eq!(is_node_enabled(&wf, "missing"), None);
    }

    #[test]
    fn test_set_widget_text() {
        let mut node = json!({"widgets_values": ["old", 42]});
        set_widget_text(&mut node, "new");
        assert_eq!(node["widgets_values"], json!(["new", 42]));

        let mut bare = json!({"id": 7});
        set_widget_text(&mut bare, "text");
        assert_eq!(bare["widgets_values"], json!(["text"]));
    }

    #[test]
    fn test_group_contains_edges() {
        let group = Group {
            title: "STYLES".into(),
            bounding: [10.0, 10.0, 100.0, 50.0],
        };
        assert!(group.contains(10.0, 10.0));
        assert!(group.contains(110.0, 60.0));
        assert!(!group.contains(111.0, 30.0));
    }
}
