// The `build` subcommand: expands every (config, template) pair found in the
// source directory into a ready-to-run workflow JSON file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use log::{error, info};
use serde_json::Value;

use crate::config::ConfigVars;
use crate::resolver;

/// Files with these names are shared configuration, applied before each
/// specific config file.
const GLOBAL_CONFIG_FILES: &[&str] = &["global.txt", "globals.txt"];

/// First-line marker that designates a .txt file as configuration.
const CONFIG_MARKER: &str = "#!ZCONFIG";

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Directory containing *.json templates and *.txt config files
    #[arg(long, short = 's', default_value = "src")]
    pub source_dir: PathBuf,

    /// Directory for generated workflows (defaults to the source dir)
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Overwrite pre-existing output files
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Also write a companion .txt listing the styles and prompt
    #[arg(long)]
    pub listing: bool,
}

struct SourceFiles {
    templates: Vec<PathBuf>,
    configs: Vec<PathBuf>,
    global_config: Option<PathBuf>,
}

fn is_config_file(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    text.lines()
        .next()
        .map(|first| first.trim_start().starts_with(CONFIG_MARKER))
        .unwrap_or(false)
}

fn scan_source_dir(dir: &Path) -> Result<SourceFiles> {
    let mut found = SourceFiles {
        templates: Vec::new(),
        configs: Vec::new(),
        global_config: None,
    };
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read source directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".json") && !name.ends_with("~.json") {
            found.templates.push(path);
        } else if name.ends_with(".txt") && is_config_file(&path) {
            if GLOBAL_CONFIG_FILES.contains(&name) {
                found.global_config = Some(path);
            } else {
                found.configs.push(path);
            }
        }
    }
    found.templates.sort();
    found.configs.sort();
    Ok(found)
}

/// Template name from the file stem: a leading "template" word (plus one
/// separator character) is stripped, as are trailing underscores.
/// "template-portrait.json" and "template_portrait_.json" both give "portrait".
fn template_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.strip_prefix("template") {
        Some(rest) => {
            let mut chars = rest.chars();
            let rest = match chars.next() {
                Some(c) if !c.is_alphanumeric() => chars.as_str(),
                _ => rest,
            };
            rest.trim_end_matches('_').to_owned()
        }
        None => stem.to_owned(),
    }
}

fn load_config(
    template_path: &Path,
    config_path: &Path,
    global_config: Option<&Path>,
) -> Result<ConfigVars> {
    let mut vars = ConfigVars::new();
    vars.set("#TEMPLATE_NAME", &template_name(template_path));
    if let Some(global) = global_config {
        vars.read_file(global)?;
    }
    vars.read_file(config_path)?;
    Ok(vars)
}

/// Expands one (template, config) pair and writes the result.
fn make_workflow(
    template_path: &Path,
    config_path: &Path,
    global_config: Option<&Path>,
    args: &BuildArgs,
) -> Result<PathBuf> {
    let vars = load_config(template_path, config_path, global_config)?;

    let Some(prefix) = vars.get("#FILEPREFIX") else {
        bail!(
            "{} defines no #FILEPREFIX variable",
            config_path.display()
        );
    };
    let stem = template_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let output_dir = args.output_dir.as_deref().unwrap_or(&args.source_dir);
    let output_path = output_dir.join(format!("{}{}.json", prefix, stem));
    if output_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output_path.display()
        );
    }

    let text = std::fs::read_to_string(template_path)
        .with_context(|| format!("failed to read template {}", template_path.display()))?;
    let mut workflow: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse template {}", template_path.display()))?;

    resolver::resolve(&mut workflow, &vars)?;

    let mut rendered = serde_json::to_string_pretty(&workflow)
        .context("failed to serialize resolved workflow")?;
    rendered.push('\n');
    std::fs::write(&output_path, rendered)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    if args.listing {
        write_listing(&output_path, &vars)?;
    }
    Ok(output_path)
}

/// Companion text file: the styles that went into the workflow, plus the
/// captured prompt when one was set.
fn write_listing(output_path: &Path, vars: &ConfigVars) -> Result<()> {
    let mut text = String::from("Styles:\n");
    for (name, _) in vars.styles() {
        text.push_str("  - ");
        text.push_str(name);
        text.push('\n');
    }
    if let Some(prompt) = vars.get("#PROMPT") {
        text.push_str("Prompt:\n  ");
        text.push_str(prompt);
        text.push('\n');
    }
    let listing_path = output_path.with_extension("txt");
    std::fs::write(&listing_path, text)
        .with_context(|| format!("failed to write {}", listing_path.display()))
}

pub fn run(args: &BuildArgs) -> Result<()> {
    let found = scan_source_dir(&args.source_dir)?;
    if found.templates.is_empty() {
        bail!(
            "no JSON template files found in {}",
            args.source_dir.display()
        );
    }
    if found.configs.is_empty() {
        bail!(
            "no valid text configuration files found in {}",
            args.source_dir.display()
        );
    }

    if let Some(global) = &found.global_config {
        info!("Global config: {}", global.display());
    }
    for config in &found.configs {
        info!("Config: {}", config.display());
    }
    for template in &found.templates {
        info!("Template: {}", template.display());
    }

    let mut failures = 0usize;
    for config_path in &found.configs {
        for template_path in &found.templates {
            match make_workflow(
                template_path,
                config_path,
                found.global_config.as_deref(),
                args,
            ) {
                Ok(output) => info!("Wrote {}", output.display()),
                Err(e) => {
                    // Per-file failure: report and keep going.
                    error!(
                        "{} x {}: {:#}",
                        template_path.display(),
                        config_path.display(),
                        e
                    );
                    failures += 1;
                }
            }
        }
    }
    if failures > 0 {
        info!("Finished with {} failed combination(s)", failures);
    }
    Ok(())
}
