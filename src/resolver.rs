// Template resolution: turns a workflow template plus a ConfigVars into a
// ready-to-run workflow. Loosely the same job as splicing parameters into a
// backend prompt, but against the graph structure instead of raw text.

use anyhow::{bail, Result};
use log::warn;
use serde_json::Value;

use crate::config::{ConfigVars, NodeMode};
use crate::workflow;

/// Name of the group whose nodes receive the styles.
const STYLES_GROUP: &str = "STYLES";

/// Recursively substitutes variables into every string value of the tree.
/// Keys and non-string values pass through unchanged.
pub fn substitute_tree(value: &mut Value, vars: &ConfigVars) {
    match value {
        Value::String(s) => *s = vars.substitute(s),
        Value::Array(items) => {
            for item in items {
                substitute_tree(item, vars);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_tree(item, vars);
            }
        }
        _ => {}
    }
}

/// Indices of the nodes positioned inside the STYLES group, top to bottom.
fn style_node_indices(workflow: &Value) -> Result<Vec<usize>> {
    let Some(group) = workflow::find_group(workflow, STYLES_GROUP) else {
        bail!("template has no group titled \"{}\"", STYLES_GROUP);
    };
    let nodes = workflow
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let mut found: Vec<(usize, f64)> = nodes
        .iter()
        .enumerate()
        .filter_map(|(i, node)| {
            let (x, y) = workflow::node_pos(node)?;
            group.contains(x, y).then_some((i, y))
        })
        .collect();
    // Stable, so ties keep document order.
    found.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(found.into_iter().map(|(i, _)| i).collect())
}

/// Resolves a parsed template in place:
/// variable substitution over the whole tree, positional style assignment
/// inside the STYLES group, prompt injection, then queued mode directives.
pub fn resolve(workflow: &mut Value, vars: &ConfigVars) -> Result<()> {
    substitute_tree(workflow, vars);

    // Styles go to the in-region nodes positionally; surplus nodes are
    // blanked rather than removed so the graph topology stays intact.
    let indices = style_node_indices(workflow)?;
    for (slot, node_index) in indices.into_iter().enumerate() {
        let (title, body) = match vars.styles().get(slot) {
            Some((name, body)) => (format!("STYLE: {}", name), body.as_str()),
            None => (String::new(), ""),
        };
        let node = &mut workflow["nodes"][node_index];
        node["title"] = Value::String(title);
        node["widgets_values"] = serde_json::json!([body]);
    }

    if let Some(prompt) = vars.get("#PROMPT") {
        let prompt = prompt.to_owned();
        match find_node_index(workflow, "PROMPT") {
            Some(i) => workflow::set_widget_text(&mut workflow["nodes"][i], &prompt),
            None => warn!("#PROMPT is set but the template has no PROMPT node"),
        }
    }

    apply_directives(workflow, vars);
    Ok(())
}

fn find_node_index(workflow: &Value, title: &str) -> Option<usize> {
    workflow
        .get("nodes")?
        .as_array()?
        .iter()
        .position(|n| workflow::node_title(n) == title)
}

fn apply_directives(workflow: &mut Value, vars: &ConfigVars) {
    for directive in vars.directives() {
        let mode = match directive.mode {
            NodeMode::Enabled => workflow::MODE_ALWAYS,
            NodeMode::Disabled => workflow::MODE_BYPASS,
        };
        if directive.title == "*" {
            if let Some(nodes) = workflow.get_mut("nodes").and_then(Value::as_array_mut) {
                for node in nodes {
                    node["mode"] = mode.into();
                }
            }
        } else {
            match find_node_index(workflow, &directive.title) {
                Some(i) => workflow["nodes"][i]["mode"] = mode.into(),
                None => warn!("No node titled {:?} to {:?}", directive.title, directive.mode),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Value {
        json!({
            "last_node_id": 5,
            "nodes": [
                {"id": 1, "title": "slot b", "type": "Note", "pos": [50, 300],
                 "mode": 0, "widgets_values": ["x"]},
                {"id": 2, "title": "slot a", "type": "Note", "pos": [50, 100],
                 "mode": 0, "widgets_values": ["x"]},
                {"id": 3, "title": "slot c", "type": "Note", "pos": [50, 500],
                 "mode": 0, "widgets_values": ["x"]},
                {"id": 4, "title": "PROMPT", "type": "Note", "pos": [900, 10],
                 "mode": 0, "widgets_values": ["old prompt"]},
                {"id": 5, "title": "Upscaler", "type": "Upscale", "pos": [900, 400],
                 "mode": 0}
            ],
            "groups": [
                {"title": "STYLES", "bounding": [0, 0, 200, 600]}
            ]
        })
    }

    fn demo_config() -> ConfigVars {
        let mut vars = ConfigVars::new();
        vars.read_str(
            "#!ZCONFIG\n\
             {#FILEPREFIX}\ndemo_\n\
             >>>Realistic\nrealistic photo\n\
             >>>Anime\nanime style\n\
             >>:DISABLE\nUpscaler\n",
        );
        vars
    }

    #[test]
    fn test_positional_style_assignment() {
        let mut wf = template();
        resolve(&mut wf, &demo_config()).unwrap();
        // Sorted by y: slot a (100), slot b (300), slot c (500).
        assert_eq!(wf["nodes"][1]["title"], "STYLE: Realistic");
        assert_eq!(wf["nodes"][1]["widgets_values"], json!(["realistic photo"]));
        assert_eq!(wf["nodes"][0]["title"], "STYLE: Anime");
        assert_eq!(wf["nodes"][0]["widgets_values"], json!(["anime style"]));
        // Third in-region node gets blanked, not removed.
        assert_eq!(wf["nodes"][2]["title"], "");
        assert_eq!(wf["nodes"][2]["widgets_values"], json!([""]));
        // The disable directive hit the Upscaler.
        assert_eq!(wf["nodes"][4]["mode"], json!(workflow::MODE_BYPASS));
        // Out-of-region nodes keep their titles.
        assert_eq!(wf["nodes"][3]["title"], "PROMPT");
    }

    #[test]
    fn test_missing_styles_group_is_an_error() {
        let mut wf = template();
        wf["groups"] = json!([]);
        assert!(resolve(&mut wf, &demo_config()).is_err());
    }

    #[test]
    fn test_prompt_injection() {
        let mut wf = template();
        let mut vars = demo_config();
        vars.set("#PROMPT", "a red fox");
        resolve(&mut wf, &vars).unwrap();
        assert_eq!(wf["nodes"][3]["widgets_values"], json!(["a red fox"]));
    }

    #[test]
    fn test_wildcard_directive() {
        let mut wf = template();
        let mut vars = ConfigVars::new();
        vars.read_str(">>:DISABLE\n*\n");
        resolve(&mut wf, &vars).unwrap();
        for node in wf["nodes"].as_array().unwrap() {
            assert_eq!(node["mode"], json!(workflow::MODE_BYPASS));
        }
    }

    #[test_log::test]
    fn test_unmatched_directive_is_not_fatal() {
        let mut wf = template();
        let mut vars = demo_config();
        vars.read_str(">>:ENABLE\nNo Such Node\n");
        assert!(resolve(&mut wf, &vars).is_ok());
    }

    #[test]
    fn test_tree_substitution() {
        let mut vars = ConfigVars::new();
        vars.set("#MODEL", "zimage.safetensors");
        let mut tree = json!({
            "a": "load {#MODEL} now",
            "b": ["{#MODEL}", 17, {"c": "{#OTHER}"}],
            "d": true
        });
        substitute_tree(&mut tree, &vars);
        assert_eq!(tree["a"], "load zimage.safetensors now");
        assert_eq!(tree["b"][0], "zimage.safetensors");
        assert_eq!(tree["b"][1], 17);
        assert_eq!(tree["b"][2]["c"], "{#OTHER}");
        assert_eq!(tree["d"], true);
    }

    #[test]
    fn test_substitution_round_trip() {
        // No string references any defined variable: the tree is unchanged.
        let vars = ConfigVars::new();
        let original = json!({
            "nodes": [{"title": "PROMPT", "widgets_values": ["{braces} stay"]}],
            "order": {"z": 1, "a": 2}
        });
        let mut tree = original.clone();
        substitute_tree(&mut tree, &vars);
        assert_eq!(tree, original);
    }
}
