//! `kbundle relocate` command.
//!
//! Unpacks a bundle archive into a scratch directory, pushes every image from
//! its layout under the target prefix and prints the mapping. A dry run never
//! contacts a registry.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use kbundle_runtime::{
    unpack_archive, ManifestRewriter, MemoryRegistry, OciLayout, Registry, RelocateOptions,
    Relocator,
};

use super::GlobalArgs;
use crate::output;

#[derive(Args)]
pub struct RelocateArgs {
    /// Bundle archive (.tgz)
    pub archive: PathBuf,

    /// Target registry and path (e.g., "registry.example.com/mirror")
    pub prefix: String,

    /// Print the mapping without pushing
    #[arg(long)]
    pub dry_run: bool,

    /// Write manifests with relocated image references to this directory
    #[arg(long)]
    pub manifests_out: Option<PathBuf>,
}

pub async fn execute(
    args: RelocateArgs,
    global: &GlobalArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let scratch = tempfile::Builder::new()
        .prefix("kbundle-relocate-")
        .tempdir()?;
    let dest = scratch.path().join("bundle");

    let assembler = super::assembler(global);
    let staged = unpack_archive(&args.archive, &dest, &assembler)?;
    let images = staged.bundle.images(assembler.scanner())?;

    let registry: Arc<dyn Registry> = if args.dry_run {
        Arc::new(MemoryRegistry::new())
    } else {
        super::registry(global)
    };
    let layout = OciLayout::open(&staged.bundle.layout_path(), registry)?;
    let relocator = Relocator::new(RelocateOptions {
        prefix: args.prefix,
        dry_run: args.dry_run,
    });
    let relocations = relocator.relocate(&layout, &images).await?;

    let mut table = output::new_table(&["ORIGINAL", "RELOCATED", "DIGEST"]);
    for relocation in &relocations {
        table.add_row(vec![
            relocation.original.to_string(),
            relocation.relocated.to_string(),
            output::short_digest(&relocation.digest).to_string(),
        ]);
    }
    println!("{table}");

    if let Some(out_dir) = args.manifests_out {
        let rewriter = ManifestRewriter::new(&relocations)?;
        let written = rewriter.rewrite_all_to(staged.bundle.manifests(), &out_dir)?;
        println!("Wrote {} manifests to {}", written.len(), out_dir.display());
    }

    if args.dry_run {
        println!("Dry run: nothing was pushed");
    }
    Ok(())
}
