//! `kbundle images` command.

use clap::Args;

use super::BundleDirArgs;

#[derive(Args)]
pub struct ImagesArgs {
    /// Print the image list as a JSON array
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: ImagesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = super::open_bundle(&args.bundle.dir)?;
    let images = bundle.images(&super::scanner())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&images)?);
        return Ok(());
    }

    for image in images.strings() {
        println!("{image}");
    }
    Ok(())
}
