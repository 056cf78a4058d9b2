//! `kbundle pull` command.

use std::path::PathBuf;

use clap::Args;
use kbundle_core::ImageRef;
use kbundle_runtime::pull_archive;

use super::GlobalArgs;

#[derive(Args)]
pub struct PullArgs {
    /// Bundle image reference
    pub reference: String,

    /// Destination directory (must be empty or absent)
    pub dest: PathBuf,
}

pub async fn execute(args: PullArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse_in(&args.reference, "pull source")?;
    let registry = super::registry(global);

    println!("Pulling {}...", reference);
    pull_archive(&reference, registry.as_ref(), &args.dest).await?;
    println!("Pulled: {} ({})", reference, args.dest.display());
    Ok(())
}
