use anyhow::Result;
use clap::{Parser, Subcommand};

mod config;
mod gallery;
mod grouping;
mod make;
mod metadata;
mod resolver;
mod text;
mod workflow;

/// Authoring tooling for ComfyUI workflows: expands config-driven workflow
/// templates, and regroups the generated images into labeled galleries.
#[derive(Parser, Debug)]
#[command(version)]
struct CommandLineFlags {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand workflow templates with their config files
    Build(make::BuildArgs),
    /// Build contact-sheet galleries from generated images
    Gallery(gallery::GalleryArgs),
}

fn main() -> Result<()> {
    env_logger::init();
    let args = CommandLineFlags::parse();

    match &args.command {
        Command::Build(build_args) => make::run(build_args),
        Command::Gallery(gallery_args) => gallery::run(gallery_args),
    }
}
