//! `kbundle add-image` command.

use clap::Args;

use super::BundleDirArgs;

#[derive(Args)]
pub struct AddImageArgs {
    /// Image reference (e.g., "nginx:1.25", "ghcr.io/org/image@sha256:...")
    pub image: String,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: AddImageArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut bundle = super::open_bundle(&args.bundle.dir)?;
    let image = bundle.add_image(&args.image)?;
    println!("Added {}", image);
    Ok(())
}
