//! Integration tests for the `cforge` binary.
//!
//! Commands run against a local Git repository so no network is involved.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use git2::Signature;
use predicates::prelude::*;
use tempfile::TempDir;

/// A content repository plus a config file pointing at it.
struct Site {
    dir: TempDir,
}

impl Site {
    fn new(workflow: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo");
        let repo = git2::Repository::init(&repo_path).unwrap();

        let mut index = repo.index().unwrap();
        for (path, content) in [
            ("content/posts/hello.md", "---\ntitle: Hello\n---\n"),
            ("content/posts/2024/old.md", "old"),
        ] {
            let full = repo_path.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let oid = repo.commit(None, &sig, &sig, "initial", &tree, &[]).unwrap();
        repo.branch("main", &repo.find_commit(oid).unwrap(), false)
            .unwrap();

        let config = format!(
            "[backend]\nprovider = \"git\"\nrepo = \"local/site\"\nbranch = \"main\"\napi_root = {:?}\n\n[workflow]\nenabled = {}\n",
            repo_path.display().to_string(),
            workflow
        );
        std::fs::write(dir.path().join("contentforge.toml"), config).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("contentforge.toml")
    }

    fn cforge(&self) -> Command {
        let mut cmd = cforge();
        cmd.arg("--config").arg(self.config());
        cmd
    }
}

fn cforge() -> Command {
    let mut cmd = Command::cargo_bin("cforge").unwrap();
    cmd.env_remove("CONTENTFORGE_CONFIG")
        .env_remove("CONTENTFORGE_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    cforge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("put"))
        .stdout(predicate::str::contains("entry"));
}

#[test]
fn version_flag_works() {
    cforge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cforge"));
}

#[test]
fn missing_config_is_reported() {
    let dir = TempDir::new().unwrap();
    cforge()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn ls_respects_depth() {
    let site = Site::new(false);

    site.cforge()
        .args(["ls", "content/posts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("content/posts/hello.md"))
        .stdout(predicate::str::contains("old.md").not());

    site.cforge()
        .args(["ls", "content/posts", "--depth", "2", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"content/posts/2024/old.md\""));
}

#[test]
fn put_then_cat() {
    let site = Site::new(false);
    let local = site.dir.path().join("draft.md");
    std::fs::write(&local, "fresh post").unwrap();

    site.cforge()
        .arg("put")
        .arg(format!("content/posts/fresh.md={}", local.display()))
        .args(["--new", "-m", "Create fresh"])
        .assert()
        .success();

    site.cforge()
        .args(["cat", "content/posts/fresh.md"])
        .assert()
        .success()
        .stdout("fresh post");
}

#[test]
fn put_new_over_existing_file_fails() {
    let site = Site::new(false);
    let local = site.dir.path().join("hello.md");
    std::fs::write(&local, "overwrite").unwrap();

    site.cforge()
        .arg("put")
        .arg(format!("content/posts/hello.md={}", local.display()))
        .args(["--new", "-m", "Create hello"])
        .assert()
        .failure();

    site.cforge()
        .args(["cat", "content/posts/hello.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("title: Hello"));
}

#[test]
fn workflow_needs_pull_requests() {
    let site = Site::new(true);
    site.cforge()
        .args(["entry", "submit", "posts", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pull requests"));
}
