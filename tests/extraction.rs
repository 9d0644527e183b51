mod common;

use common::{ARTIFACT_NAME, Call, FakeBackend, context, snapshot};
use finder_release::descriptor::{builder_image_name, descriptor_name, ignore_file_name};
use finder_release::error::{BuildError, BuildStage, ReleaseError};
use finder_release::extract::{ArtifactExtractor, sha256_file};
use finder_release::target::{Arch, Platform, TargetKey, TargetMatrix};
use std::fs::File;
use std::sync::Arc;

#[tokio::test]
async fn colliding_filenames_stay_in_their_target_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(FakeBackend::new());
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));

    let report = extractor.extract_all(TargetMatrix::all_keys()).await;

    assert!(report.summary().is_success(), "{}", report.summary());
    assert!(report.warnings.is_empty());

    for key in TargetMatrix::all_keys() {
        let image = builder_image_name(&ctx.config.builder_image_prefix, &key, &ctx.identity);
        let dir = ctx.config.package_dir.join(key.to_string());

        // Every container wrote the same names; each copy must come from its own target
        let contents = std::fs::read_to_string(dir.join(ARTIFACT_NAME)).expect("artifact merged");
        assert_eq!(contents, image);
        let shared = std::fs::read_to_string(dir.join("lib").join("shared.txt")).expect("merged");
        assert_eq!(shared, image);

        let artifacts = report.results[&key].as_ref().expect("target succeeded");
        assert_eq!(artifacts.files.len(), 2);
        assert!(artifacts.files.iter().all(|f| f.sha256.len() == 64));
    }
}

#[tokio::test]
async fn intermediates_are_discarded_after_success() {
    let root = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(FakeBackend::new());
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));
    let key = TargetKey::new(Platform::Linux, Arch::Aarch64);

    let report = extractor.extract_all(vec![key]).await;
    assert!(report.results[&key].is_ok());

    let image = builder_image_name(&ctx.config.builder_image_prefix, &key, &ctx.identity);
    assert!(backend.images().is_empty(), "builder image left behind");
    assert!(backend.calls().contains(&Call::Remove(image)));
    let descriptor = descriptor_name(&key, &ctx.identity);
    assert!(!ctx.config.work_dir.join(&descriptor).exists());
    assert!(!ctx.config.work_dir.join(ignore_file_name(&descriptor)).exists());
    assert!(!ctx.config.staging_root().join(key.to_string()).exists());

    // Package and work directories sit inside the context and must not be sent to the builder
    assert_eq!(backend.ignore_rules(), vec!["packages\nwork\n".to_string()]);

    let build = backend
        .calls()
        .into_iter()
        .find(|c| matches!(c, Call::Build { .. }))
        .expect("one build");
    assert_eq!(
        build,
        Call::Build {
            label: "linux-aarch64".to_string(),
            platform: Some("linux/arm64".to_string()),
            tags: vec!["finder-release-builder:linux-aarch64-8be54df8".to_string()],
        }
    );
}

#[tokio::test]
async fn failed_target_does_not_stop_siblings_and_still_cleans_up() {
    let root = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(FakeBackend::new().failing_build("macos-x86_64"));
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));

    let failing = TargetKey::new(Platform::Macos, Arch::X86_64);
    let healthy = TargetKey::new(Platform::Linux, Arch::X86_64);
    let report = extractor.extract_all(vec![failing, healthy]).await;

    match &report.results[&failing] {
        Err(ReleaseError::Build(BuildError::BuildFailed { target, stage, .. })) => {
            assert_eq!(target, "macos-x86_64");
            assert_eq!(*stage, BuildStage::ImageBuild);
        }
        other => panic!("expected image build failure, got {:?}", other),
    }
    assert!(report.results[&healthy].is_ok());
    assert!(!ctx.config.package_dir.join("macos-x86_64").exists());
    assert!(!ctx.config.work_dir.join(descriptor_name(&failing, &ctx.identity)).exists());

    let summary = report.summary();
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.succeeded, vec!["linux-x86_64".to_string()]);
}

#[tokio::test]
async fn rerun_overwrites_within_the_same_target() {
    let root = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(FakeBackend::new());
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let key = TargetKey::new(Platform::Windows, Arch::X86_64);

    let dir = ctx.config.package_dir.join(key.to_string());
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join(ARTIFACT_NAME), "stale").expect("write");
    std::fs::write(dir.join("previous-run.txt"), "kept").expect("write");

    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));
    let report = extractor.extract_all(vec![key]).await;
    assert!(report.results[&key].is_ok());

    let contents = std::fs::read_to_string(dir.join(ARTIFACT_NAME)).expect("read");
    assert_ne!(contents, "stale");
    assert!(dir.join("previous-run.txt").exists());
}

#[tokio::test]
async fn context_ignore_rules_are_carried_into_descriptor_ignore_file() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::write(root.path().join(".dockerignore"), ".git\n*.pyc\n").expect("write");
    let backend = Arc::new(FakeBackend::new());
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));

    let report = extractor
        .extract_all(vec![TargetKey::new(Platform::Macos, Arch::X86_64)])
        .await;
    assert!(report.summary().is_success(), "{}", report.summary());
    assert_eq!(
        backend.ignore_rules(),
        vec![".git\n*.pyc\npackages\nwork\n".to_string()]
    );
}

#[tokio::test]
async fn every_target_gets_a_standalone_archive() {
    let root = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(FakeBackend::new());
    let ctx = Arc::new(context(root.path(), snapshot(), None));
    let extractor = ArtifactExtractor::new(Arc::clone(&backend), Arc::clone(&ctx));
    let linux = TargetKey::new(Platform::Linux, Arch::X86_64);
    let windows = TargetKey::new(Platform::Windows, Arch::X86_64);

    let report = extractor.extract_all(vec![linux, windows]).await;
    assert!(report.summary().is_success(), "{}", report.summary());

    let tarball = report.results[&linux].as_ref().expect("linux succeeded").archive.clone();
    assert_eq!(
        tarball.path,
        ctx.config
            .package_dir
            .join("agent-integrations-finder-linux-x86_64.tar.gz")
    );
    assert_eq!(tarball.sha256, sha256_file(&tarball.path).expect("checksum"));
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(
        File::open(&tarball.path).expect("open tarball"),
    ));
    let mut names: Vec<String> = archive
        .entries()
        .expect("entries")
        .map(|entry| {
            let entry = entry.expect("entry");
            entry.path().expect("path").display().to_string()
        })
        .filter(|name| !name.ends_with('/') && name != "lib")
        .collect();
    names.sort();
    assert_eq!(names, vec![ARTIFACT_NAME.to_string(), "lib/shared.txt".to_string()]);

    let zipped = report.results[&windows].as_ref().expect("windows succeeded").archive.clone();
    assert_eq!(
        zipped.path,
        ctx.config.package_dir.join("agent-integrations-finder-win-x86_64.zip")
    );
    let mut archive = zip::ZipArchive::new(File::open(&zipped.path).expect("open zip")).expect("zip");
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();
    assert_eq!(names, vec![ARTIFACT_NAME.to_string(), "lib/shared.txt".to_string()]);

    let mut contents = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name(ARTIFACT_NAME).expect("binary in zip"),
        &mut contents,
    )
    .expect("read");
    assert_eq!(
        contents,
        builder_image_name(&ctx.config.builder_image_prefix, &windows, &ctx.identity)
    );
}
