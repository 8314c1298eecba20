// Regrouping of generated images by originating prompt and style.
//
// Both steps work on (path, workflow) pairs that were already extracted from
// the PNGs, which keeps them deterministic and testable without image files.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::Value;

use crate::workflow;

/// Type of the node whose inputs list the available styles.
const COLLECTOR_TYPE: &str = "Node Collector (rgthree)";

/// Input name marking the "no style" passthrough slot.
const NO_STYLE: &str = "none";

/// Ordered style names from the first workflow with a style collector node.
/// Collectors whose title mentions "style" are preferred; older workflows
/// have a single untitled collector, so any collector is accepted as a
/// fallback. The `none` sentinel entry is skipped.
pub fn extract_style_list(images: &[(PathBuf, Value)]) -> Option<Vec<String>> {
    for (_, workflow) in images {
        let collector = workflow::find_node_by_type(workflow, COLLECTOR_TYPE, Some("style"))
            .or_else(|| workflow::find_node_by_type(workflow, COLLECTOR_TYPE, None));
        let Some(inputs) = collector
            .and_then(|node| node.get("inputs"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        let styles: Vec<String> = inputs
            .iter()
            .filter_map(|input| input.get("name").and_then(Value::as_str))
            .filter(|name| !name.is_empty() && *name != NO_STYLE)
            .map(str::to_owned)
            .collect();
        if !styles.is_empty() {
            return Some(styles);
        }
    }
    None
}

/// Groups images by prompt into fixed-length slot arrays, one slot per style.
///
/// An image lands in slot i when style i is the first style in the list whose
/// same-titled node is enabled in the image's workflow; images with no enabled
/// style are dropped. Prompts keep first-seen order.
pub fn group_by_prompt_and_style(
    images: &[(PathBuf, Value)],
    style_list: &[String],
) -> IndexMap<String, Vec<Option<PathBuf>>> {
    let mut groups: IndexMap<String, Vec<Option<PathBuf>>> = IndexMap::new();

    for (path, workflow) in images {
        let prompt = workflow::find_node(workflow, "PROMPT")
            .and_then(workflow::widget_text)
            .unwrap_or("??")
            .to_owned();

        let style_index = style_list
            .iter()
            .position(|style| workflow::is_node_enabled(workflow, style) == Some(true));
        let Some(style_index) = style_index else {
            continue;
        };

        let slots = groups
            .entry(prompt)
            .or_insert_with(|| vec![None; style_list.len()]);
        slots[style_index] = Some(path.clone());
    }

    groups
}
