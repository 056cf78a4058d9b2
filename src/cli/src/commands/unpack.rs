//! `kbundle unpack` command.

use std::path::PathBuf;

use clap::Args;
use kbundle_runtime::unpack_archive;

use super::GlobalArgs;

#[derive(Args)]
pub struct UnpackArgs {
    /// Bundle archive (.tgz)
    pub archive: PathBuf,

    /// Destination directory (must be empty or absent)
    pub dest: PathBuf,
}

pub async fn execute(args: UnpackArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let staged = unpack_archive(&args.archive, &args.dest, &super::assembler(global))?;
    println!(
        "Unpacked {} {} to {} ({} images)",
        staged.bundle.config().name(),
        staged.bundle.config().version(),
        args.dest.display(),
        staged.layout_images.len()
    );
    Ok(())
}
