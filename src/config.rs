// This module handles the line-oriented configuration files.
// A config file is a sequence of action blocks: an action line starts the
// block, everything until the next action line (or EOF) is its body.
//
//   {#NAME}    defines a variable (the stored key keeps the leading '#')
//   >>>NAME    defines a style
//   >>:ENABLE  queues node-mode changes, one target title per body line
//   >>:DISABLE
//   #!...      marker line, the block content is discarded

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::warn;

/// Node enablement requested by a `>>:` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    Enabled,
    Disabled,
}

/// One queued node-mode change. `title` may be `*` for all nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDirective {
    pub mode: NodeMode,
    pub title: String,
}

/// Accumulated configuration: ordered variables, ordered styles, and queued
/// node-mode directives. Reading several files into the same ConfigVars makes
/// later definitions win on key collision.
#[derive(Debug, Default)]
pub struct ConfigVars {
    vars: IndexMap<String, String>,
    styles: Vec<(String, String)>,
    directives: Vec<ModeDirective>,
}

impl ConfigVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_owned(), value.to_owned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// (style name, style body) pairs in definition order.
    pub fn styles(&self) -> &[(String, String)] {
        &self.styles
    }

    pub fn directives(&self) -> &[ModeDirective] {
        &self.directives
    }

    /// Replaces every `{KEY}` span whose KEY is a defined variable with its
    /// value. Undefined spans are left as literal text, braces included, so a
    /// later pass can still resolve them. Stray or unbalanced braces pass
    /// through untouched; workflow JSON strings are full of them.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            // The span ends at the first '}' with no '{' before it.
            match after.find(['{', '}']) {
                Some(end) if after.as_bytes()[end] == b'}' => {
                    let key = &after[..end];
                    match self.vars.get(key) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                _ => {
                    // No terminator, or a nested '{' first. Not a span.
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn read_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        self.read_str(&text);
        Ok(())
    }

    /// Parses configuration text, accumulating into self.
    pub fn read_str(&mut self, text: &str) {
        let mut action: Option<String> = None;
        let mut body: Vec<&str> = Vec::new();
        for line in text.lines() {
            let candidate = line.trim();
            if candidate.starts_with("#!")
                || candidate.starts_with("{#")
                || candidate.starts_with(">>>")
                || candidate.starts_with(">>:")
            {
                if let Some(action) = action.take() {
                    self.store(&action, &body);
                }
                action = Some(candidate.to_owned());
                body.clear();
            } else {
                body.push(line.trim_end());
            }
        }
        if let Some(action) = action.take() {
            self.store(&action, &body);
        }
    }

    fn store(&mut self, action: &str, body: &[&str]) {
        // The body sees every variable defined before it, then gets trimmed.
        let body = self.substitute(&body.join("\n"));
        let body = body.trim();

        if let Some(inner) = action.strip_prefix('{') {
            let key = inner.trim_end_matches('}').trim();
            self.vars.insert(key.to_owned(), body.to_owned());
        } else if let Some(name) = action.strip_prefix(">>>") {
            self.styles.push((name.trim().to_owned(), body.to_owned()));
        } else if let Some(command) = action.strip_prefix(">>:") {
            let mode = match command.trim().to_uppercase().as_str() {
                "ENABLE" => NodeMode::Enabled,
                "DISABLE" => NodeMode::Disabled,
                other => {
                    warn!("Unrecognized directive >>:{}, skipping", other);
                    return;
                }
            };
            for title in body.lines().map(str::trim).filter(|t| !t.is_empty()) {
                self.directives.push(ModeDirective {
                    mode,
                    title: title.to_owned(),
                });
            }
        }
        // "#!" marker blocks fall through and are discarded.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_and_styles() {
        let mut vars = ConfigVars::new();
        vars.read_str(
            "#!ZCONFIG\n\
             {#FILEPREFIX}\n\
             demo_\n\
             >>>Realistic\n\
             realistic photo\n\
             of a scene\n\
             >>>Anime\n\
             anime style\n",
        );
        assert_eq!(vars.get("#FILEPREFIX"), Some("demo_"));
        assert_eq!(
            vars.styles(),
            &[
                ("Realistic".to_owned(), "realistic photo\nof a scene".to_owned()),
                ("Anime".to_owned(), "anime style".to_owned()),
            ]
        );
    }

    #[test]
    fn test_last_block_is_flushed() {
        let mut vars = ConfigVars::new();
        vars.read_str("{#X}\nlast block");
        assert_eq!(vars.get("#X"), Some("last block"));
    }

    #[test]
    fn test_empty_body_is_valid() {
        let mut vars = ConfigVars::new();
        vars.read_str("{#EMPTY}\n>>>Blank\n{#OTHER}\nvalue\n");
        assert_eq!(vars.get("#EMPTY"), Some(""));
        assert_eq!(vars.styles(), &[("Blank".to_owned(), String::new())]);
        assert_eq!(vars.get("#OTHER"), Some("value"));
    }

    #[test]
    fn test_bodies_see_earlier_variables() {
        let mut vars = ConfigVars::new();
        vars.read_str("{#BASE}\nphoto\n{#FULL}\na {#BASE} of a cat\n");
        assert_eq!(vars.get("#FULL"), Some("a photo of a cat"));
        // A reference defined only later stays literal.
        let mut vars = ConfigVars::new();
        vars.read_str("{#FULL}\na {#BASE} of a cat\n{#BASE}\nphoto\n");
        assert_eq!(vars.get("#FULL"), Some("a {#BASE} of a cat"));
    }

    #[test]
    fn test_later_files_take_precedence() {
        let mut vars = ConfigVars::new();
        vars.read_str("{#X}\nglobal\n");
        vars.read_str("{#X}\nspecific\n");
        assert_eq!(vars.get("#X"), Some("specific"));
    }

    #[test_log::test]
    fn test_unknown_directive_is_skipped() {
        let mut vars = ConfigVars::new();
        vars.read_str(">>:FROBNICATE\nUpscaler\n>>:DISABLE\nUpscaler\n");
        assert_eq!(
            vars.directives(),
            &[ModeDirective {
                mode: NodeMode::Disabled,
                title: "Upscaler".to_owned()
            }]
        );
    }

    #[test]
    fn test_directive_multiple_targets() {
        let mut vars = ConfigVars::new();
        vars.read_str(">>:ENABLE\nSampler\n*\n");
        assert_eq!(vars.directives().len(), 2);
        assert_eq!(vars.directives()[1].title, "*");
    }

    #[test]
    fn test_substitute_undefined_stays_literal() {
        let vars = ConfigVars::new();
        assert_eq!(vars.substitute("a {#MISSING} b"), "a {#MISSING} b");
    }

    #[test]
    fn test_substitute_stray_braces() {
        let mut vars = ConfigVars::new();
        vars.set("#X", "v");
        assert_eq!(vars.substitute("json: { \"a\": 1 }"), "json: { \"a\": 1 }");
        assert_eq!(vars.substitute("{{#X}"), "{v");
        assert_eq!(vars.substitute("open { only"), "open { only");
        assert_eq!(vars.substitute("{#X} and {#X}"), "v and v");
    }

    #[test]
    fn test_substitute_value_is_not_rescanned() {
        let mut vars = ConfigVars::new();
        vars.set("#A", "{#B}");
        vars.set("#B", "deep");
        assert_eq!(vars.substitute("{#A}"), "{#B}");
    }
}
