//! `kbundle pack` command.

use std::path::PathBuf;

use clap::Args;
use kbundle_runtime::{pack_bundle, PackOptions};

use super::{BundleDirArgs, GlobalArgs};
use crate::output;

#[derive(Args)]
pub struct PackArgs {
    /// Directory to write the archive to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Overwrite an existing archive
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: PackArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = super::open_bundle(&args.bundle.dir)?;
    let assembler = super::assembler(global);
    let options = PackOptions {
        output_dir: args.output,
        force: args.force,
    };

    let archive = pack_bundle(&bundle, &assembler, &options).await?;
    let size = std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);
    println!(
        "Packed {} ({})",
        archive.display(),
        output::format_bytes(size)
    );
    Ok(())
}
