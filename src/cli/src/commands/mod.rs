//! CLI command definitions and dispatch.

mod add_image;
mod delete_locator;
mod images;
mod init;
mod pack;
mod pull;
mod push;
mod relocate;
mod set_locator;
mod unpack;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kbundle_runtime::{
    Bundle, JsonPathEngine, ManifestScanner, RegistryClient, RegistryConfig, StagingAssembler,
};

/// kbundle: package Kubernetes manifests with the images they reference.
#[derive(Parser)]
#[command(name = "kbundle", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Talk plain HTTP to registries
    #[arg(long, global = true)]
    pub insecure: bool,
}

/// Bundle directory argument.
#[derive(Args, Debug, Clone)]
pub struct BundleDirArgs {
    /// Bundle directory (holds bundle.json)
    #[arg(long = "bundle", short = 'b', default_value = ".")]
    pub dir: PathBuf,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Create bundle.json in a directory of manifests
    Init(init::InitArgs),
    /// Declare an image the manifests do not mention
    AddImage(add_image::AddImageArgs),
    /// Add or replace an image locator for a custom resource type
    SetLocator(set_locator::SetLocatorArgs),
    /// Remove an image locator
    DeleteLocator(delete_locator::DeleteLocatorArgs),
    /// List the images a bundle carries
    Images(images::ImagesArgs),
    /// Fetch every image and write the bundle archive
    Pack(pack::PackArgs),
    /// Extract a bundle archive into a directory
    Unpack(unpack::UnpackArgs),
    /// Push a bundle archive to a registry as an image
    Push(push::PushArgs),
    /// Pull a bundle image from a registry and extract it
    Pull(pull::PullArgs),
    /// Push a bundle's images under a new registry prefix
    Relocate(relocate::RelocateArgs),
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let global = cli.global;
    match cli.command {
        Command::Init(args) => init::execute(args).await,
        Command::AddImage(args) => add_image::execute(args).await,
        Command::SetLocator(args) => set_locator::execute(args).await,
        Command::DeleteLocator(args) => delete_locator::execute(args).await,
        Command::Images(args) => images::execute(args).await,
        Command::Pack(args) => pack::execute(args, &global).await,
        Command::Unpack(args) => unpack::execute(args, &global).await,
        Command::Push(args) => push::execute(args, &global).await,
        Command::Pull(args) => pull::execute(args, &global).await,
        Command::Relocate(args) => relocate::execute(args, &global).await,
    }
}

/// Scanner over the JSONPath engine.
pub(crate) fn scanner() -> Arc<ManifestScanner> {
    Arc::new(ManifestScanner::new(Arc::new(JsonPathEngine::new())))
}

/// Load the bundle rooted at `dir`.
pub(crate) fn open_bundle(dir: &Path) -> Result<Bundle, Box<dyn std::error::Error>> {
    Ok(Bundle::load(dir, &JsonPathEngine::new())?)
}

/// Registry client configured from the global flags and the environment.
pub(crate) fn registry(global: &GlobalArgs) -> Arc<RegistryClient> {
    Arc::new(RegistryClient::new(RegistryConfig::from_env(global.insecure)))
}

/// Staging assembler backed by a remote registry.
pub(crate) fn assembler(global: &GlobalArgs) -> StagingAssembler {
    StagingAssembler::new(scanner(), registry(global))
}
