//! `kbundle push` command.

use std::path::PathBuf;

use clap::Args;
use kbundle_core::ImageRef;
use kbundle_runtime::push_archive;

use super::GlobalArgs;

#[derive(Args)]
pub struct PushArgs {
    /// Bundle archive (.tgz)
    pub archive: PathBuf,

    /// Target image reference (e.g., "registry.example.com/bundles/app:1.0.0")
    pub reference: String,
}

pub async fn execute(args: PushArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse_in(&args.reference, "push target")?;
    let registry = super::registry(global);

    println!("Pushing {} to {}...", args.archive.display(), reference);
    let url = push_archive(&args.archive, &reference, registry.as_ref()).await?;
    println!("Pushed: {}", url);
    Ok(())
}
