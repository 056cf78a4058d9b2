//! `kbundle delete-locator` command.

use clap::Args;

use super::BundleDirArgs;

#[derive(Args)]
pub struct DeleteLocatorArgs {
    /// apiVersion of the custom resource
    #[arg(long)]
    pub api_version: String,

    /// kind of the custom resource
    #[arg(long)]
    pub kind: String,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: DeleteLocatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut bundle = super::open_bundle(&args.bundle.dir)?;
    let removed = bundle.delete_locator(&args.api_version, &args.kind)?;
    println!("Deleted locator {}", removed.key());
    Ok(())
}
