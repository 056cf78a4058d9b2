//! Integration test: drive the `kbundle` binary through the offline commands.
//!
//! Bundles here reference no images, are only inspected, or are packed from
//! an in-memory registry, so no real registry is contacted.

use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

use kbundle_core::ImageRef;
use kbundle_runtime::oci::image::{LayerBlob, LAYER_TAR_GZIP_MEDIA_TYPE};
use kbundle_runtime::{
    pack_bundle, Bundle, JsonPathEngine, ManifestScanner, MemoryRegistry, PackOptions,
    RegistryImage, StagingAssembler,
};
use tempfile::TempDir;

const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
        - name: web
          image: nginx:1.7.9
";

const WIDGET: &str = "\
apiVersion: example.com/v1
kind: Widget
metadata:
  name: w
spec:
  images:
    - quay.io/acme/widget:2
    - quay.io/acme/helper:2
";

fn kbundle(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kbundle"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run kbundle")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "kbundle failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_edit_and_list_images() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("web.yaml"), DEPLOYMENT).unwrap();
    std::fs::write(dir.path().join("widget.yaml"), WIDGET).unwrap();

    assert_success(&kbundle(dir.path(), &["init", "--name", "demo"]));
    assert_success(&kbundle(dir.path(), &["add-image", "redis:7"]));

    let images = kbundle(dir.path(), &["images"]);
    assert_success(&images);
    assert_eq!(
        stdout(&images),
        "docker.io/library/nginx:1.7.9\ndocker.io/library/redis:7\n"
    );

    assert_success(&kbundle(
        dir.path(),
        &[
            "set-locator",
            "--api-version",
            "example.com/v1",
            "--kind",
            "Widget",
            "--query",
            "spec.images[*]",
            "--type",
            "multiple",
        ],
    ));

    let images = kbundle(dir.path(), &["images", "--json"]);
    assert_success(&images);
    let listed: Vec<String> = serde_json::from_str(&stdout(&images)).unwrap();
    assert_eq!(
        listed,
        vec![
            "docker.io/library/nginx:1.7.9",
            "docker.io/library/redis:7",
            "quay.io/acme/helper:2",
            "quay.io/acme/widget:2",
        ]
    );

    assert_success(&kbundle(
        dir.path(),
        &["delete-locator", "--api-version", "example.com/v1", "--kind", "Widget"],
    ));
    let again = kbundle(
        dir.path(),
        &["delete-locator", "--api-version", "example.com/v1", "--kind", "Widget"],
    );
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("Error:"));
}

#[test]
fn test_invalid_image_is_rejected() {
    let dir = TempDir::new().unwrap();
    assert_success(&kbundle(dir.path(), &["init", "--name", "demo"]));

    let output = kbundle(dir.path(), &["add-image", "Not A Valid Image"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Parse error"));
}

#[test]
fn test_pack_and_unpack_without_images() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("config.yaml"), "apiVersion: v1\nkind: ConfigMap\n").unwrap();

    assert_success(&kbundle(
        &src,
        &["init", "--name", "empty", "--version", "2.0.0"],
    ));
    assert_success(&kbundle(dir.path(), &["pack", "--bundle", "src"]));
    assert!(dir.path().join("empty-2.0.0.tgz").is_file());

    // A second pack refuses to overwrite.
    assert!(!kbundle(dir.path(), &["pack", "--bundle", "src"]).status.success());
    assert_success(&kbundle(dir.path(), &["pack", "--bundle", "src", "--force"]));

    assert_success(&kbundle(dir.path(), &["unpack", "empty-2.0.0.tgz", "out"]));
    let unpacked = dir.path().join("out");
    assert!(unpacked.join("bundle.json").is_file());
    assert!(unpacked.join("app/manifests/config.yaml").is_file());
    assert!(unpacked.join("artifacts/layout/index.json").is_file());
}

#[tokio::test]
async fn test_relocate_dry_run_is_offline() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("web.yaml"), DEPLOYMENT).unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    let image = RegistryImage::from_blobs(
        b"{}".to_vec(),
        vec![LayerBlob::new(b"nginx".to_vec(), LAYER_TAR_GZIP_MEDIA_TYPE)],
    )
    .unwrap();
    registry.insert(&ImageRef::parse("nginx:1.7.9").unwrap(), image);

    let bundle = Bundle::init(&src, "web", Some("1.0.0")).unwrap();
    let scanner = Arc::new(ManifestScanner::new(Arc::new(JsonPathEngine::new())));
    let assembler = StagingAssembler::new(scanner, registry);
    let archive = pack_bundle(
        &bundle,
        &assembler,
        &PackOptions {
            output_dir: dir.path().to_path_buf(),
            force: false,
        },
    )
    .await
    .unwrap();

    // The target does not resolve; a dry run must not need it.
    let output = kbundle(
        dir.path(),
        &[
            "relocate",
            archive.to_str().unwrap(),
            "unreachable.invalid/mirror",
            "--dry-run",
        ],
    );
    assert_success(&output);
    let printed = stdout(&output);
    assert!(printed.contains("docker.io/library/nginx:1.7.9"));
    assert!(printed.contains("unreachable.invalid/mirror/"));
    assert!(printed.contains("Dry run: nothing was pushed"));
}
