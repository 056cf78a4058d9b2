//! `kbundle set-locator` command.

use clap::Args;
use kbundle_core::{Arity, UserDefinedImageLocator};
use kbundle_runtime::JsonPathEngine;

use super::BundleDirArgs;

#[derive(Args)]
pub struct SetLocatorArgs {
    /// apiVersion of the custom resource (e.g., "example.com/v1")
    #[arg(long)]
    pub api_version: String,

    /// kind of the custom resource
    #[arg(long)]
    pub kind: String,

    /// JSONPath query selecting image references (e.g., "spec.images[*]")
    #[arg(long)]
    pub query: String,

    /// Whether the query yields one image or several
    #[arg(long = "type", default_value = "single")]
    pub arity: Arity,

    #[command(flatten)]
    pub bundle: BundleDirArgs,
}

pub async fn execute(args: SetLocatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut bundle = super::open_bundle(&args.bundle.dir)?;
    let locator = UserDefinedImageLocator::new(args.api_version, args.kind, args.query, args.arity);
    let key = locator.key();
    bundle.set_locator(locator, &JsonPathEngine::new())?;
    println!("Set locator {}", key);
    Ok(())
}
