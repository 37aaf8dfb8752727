//! Unit tests for atomic package placement.

use super::*;
use crate::artefact::extraction::{ArchiveFormat, MockArchiveExtractor, StandardExtractor};
use crate::catalog::Package;
use crate::test_utils::{PackageSpec, zip_archive};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    fn root(&self) -> PathBuf {
        self.temp_dir.path().join("root")
    }

    fn download(&self, package: Package, archive: &[u8], verified: bool) -> DownloadResult {
        let archive_path = self.temp_dir.path().join(format!("{}.download", package.id));
        fs::write(&archive_path, archive).expect("write archive");
        DownloadResult {
            package,
            archive_path,
            verified,
        }
    }

    fn siblings(&self) -> Vec<String> {
        let parent = self.root();
        let mut names: Vec<String> = fs::read_dir(parent)
            .expect("read root")
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        temp_dir: tempfile::tempdir().expect("temp dir"),
    }
}

fn server_package(archive: &[u8]) -> Package {
    PackageSpec::new("server")
        .archive(archive)
        .binaries(&["bin/server"])
        .build()
}

#[rstest]
fn installs_into_fresh_destination(workspace: Workspace) {
    let archive = zip_archive(&[("bin/server", b"new"), ("README", b"docs")]);
    let download = workspace.download(server_package(&archive), &archive, true);
    let installer = Installer::new(&StandardExtractor, workspace.root());

    let installed = installer.install(&download).expect("install");

    assert_eq!(installed.destination, workspace.root().join("server"));
    assert_eq!(installed.files.len(), 2);
    assert_eq!(
        installed.binaries,
        vec![workspace.root().join("server").join("bin").join("server")]
    );
    assert_eq!(
        fs::read(installed.destination.join("bin/server")).expect("read binary"),
        b"new"
    );
    assert!(!download.archive_path.exists());
    assert_eq!(workspace.siblings(), vec!["server".to_owned()]);
}

#[rstest]
fn replaces_existing_tree_without_merging(workspace: Workspace) {
    let destination = workspace.root().join("server");
    fs::create_dir_all(destination.join("bin")).expect("create old tree");
    fs::write(destination.join("bin/server"), b"old").expect("write old binary");
    fs::write(destination.join("stale.txt"), b"stale").expect("write stale file");

    let archive = zip_archive(&[("bin/server", b"new")]);
    let download = workspace.download(server_package(&archive), &archive, true);
    Installer::new(&StandardExtractor, workspace.root())
        .install(&download)
        .expect("install");

    assert_eq!(fs::read(destination.join("bin/server")).expect("read"), b"new");
    assert!(!destination.join("stale.txt").exists());
    assert_eq!(workspace.siblings(), vec!["server".to_owned()]);
}

#[rstest]
fn unverified_download_is_refused(workspace: Workspace) {
    let archive = zip_archive(&[("bin/server", b"new")]);
    let download = workspace.download(server_package(&archive), &archive, false);
    let mut extractor = MockArchiveExtractor::new();
    extractor.expect_extract().never();

    let err = Installer::new(&extractor, workspace.root())
        .install(&download)
        .expect_err("expected refusal");

    assert!(matches!(err, InstallerError::ChecksumMismatch { .. }));
    assert!(!workspace.root().join("server").exists());
}

#[rstest]
fn mid_extraction_failure_leaves_destination_untouched(workspace: Workspace) {
    let destination = workspace.root().join("server");
    fs::create_dir_all(&destination).expect("create old tree");
    fs::write(destination.join("marker"), b"old").expect("write old file");

    let mut extractor = MockArchiveExtractor::new();
    extractor
        .expect_extract()
        .times(1)
        .returning(|_, _, dest_dir| {
            fs::write(dest_dir.join("half-written"), b"partial").expect("write partial");
            Err(ExtractionError::Io(std::io::Error::other("disk full")))
        });

    let archive = zip_archive(&[("bin/server", b"new")]);
    let download = workspace.download(server_package(&archive), &archive, true);
    let err = Installer::new(&extractor, workspace.root())
        .install(&download)
        .expect_err("expected extraction failure");

    match err {
        InstallerError::ExtractionFailed { package, reason } => {
            assert_eq!(package, "server package");
            assert!(reason.contains("disk full"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read(destination.join("marker")).expect("read"), b"old");
    assert!(!destination.join("half-written").exists());
    assert_eq!(workspace.siblings(), vec!["server".to_owned()]);
}

#[rstest]
fn leftovers_from_a_killed_run_are_removed(workspace: Workspace) {
    fs::create_dir_all(workspace.root().join(".server.partialAbC123")).expect("partial");
    fs::create_dir_all(workspace.root().join(".server.previous/bin")).expect("previous");
    fs::create_dir_all(workspace.root().join(".other.previous")).expect("unrelated");

    let archive = zip_archive(&[("bin/server", b"new")]);
    let download = workspace.download(server_package(&archive), &archive, true);
    Installer::new(&StandardExtractor, workspace.root())
        .install(&download)
        .expect("install");

    assert_eq!(
        workspace.siblings(),
        vec![".other.previous".to_owned(), "server".to_owned()]
    );
}

#[rstest]
fn traversal_is_reported_as_extraction_failure(workspace: Workspace) {
    let mut extractor = MockArchiveExtractor::new();
    extractor.expect_extract().returning(|_, format, _| {
        assert_eq!(format, ArchiveFormat::Zip);
        Err(ExtractionError::PathTraversal {
            path: "../../etc/passwd".to_owned(),
        })
    });

    let archive = zip_archive(&[("bin/server", b"new")]);
    let download = workspace.download(server_package(&archive), &archive, true);
    let err = Installer::new(&extractor, workspace.root())
        .install(&download)
        .expect_err("expected traversal failure");

    assert!(err.to_string().contains("escapes the destination"));
    assert!(!workspace.root().join("server").exists());
}

#[rstest]
fn nested_destination_parents_are_created(workspace: Workspace) {
    let archive = zip_archive(&[("tool", b"x")]);
    let package = PackageSpec::new("tool")
        .destination("runtimes/linux/tool")
        .archive(&archive)
        .build();
    let download = workspace.download(package, &archive, true);

    let installed = Installer::new(&StandardExtractor, workspace.root())
        .install(&download)
        .expect("install");
    assert!(installed.destination.join("tool").is_file());
}
