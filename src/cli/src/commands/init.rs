//! `kbundle init` command.

use clap::Args;
use kbundle_runtime::Bundle;

use super::BundleDirArgs;

#[derive(Args)]
pub struct InitArgs {
    /// Bundle name (used in the archive file name)
    #[arg(long)]
    pub name: String,

    /// Bundle version [default: 0.1.0]
    #[arg(long)]
    pub version: Option<String>,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = Bundle::init(&args.bundle.dir, &args.name, args.version.as_deref())?;
    println!(
        "Initialized bundle {} {} in {} ({} manifests)",
        bundle.config().name(),
        bundle.config().version(),
        args.bundle.dir.display(),
        bundle.manifests().len()
    );
    Ok(())
}
