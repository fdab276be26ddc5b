#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("splice.toml");
        let storage = dir.path().join("store");
        fs::write(
            &config,
            format!(
                "[storage]\ntype = \"filesystem\"\npath = {:?}\n\n[buckets]\nscratch = \"scratch\"\noverflow = \"overflow\"\n",
                storage.display().to_string()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("splicectl").unwrap();
        cmd.env("RUST_LOG", "warn")
            .env_remove("SPLICE_CONFIG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "splicectl {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.dir.path().join("store").join(bucket).join("data").join(key)
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn create(ws: &Workspace, key: &str) -> String {
    let session = ws.json(&[
        "create",
        "--bucket",
        "dest",
        "--key",
        key,
        "--content-type",
        "text/plain",
        "--meta",
        "owner=ops",
    ]);
    session["upload_id"].as_str().unwrap().to_string()
}

#[test]
fn upload_and_complete_assembles_object() {
    let ws = Workspace::new();
    let upload_id = create(&ws, "logs/app.log");

    for (n, body) in [(1, "alpha "), (2, "beta "), (3, "gamma")] {
        let file = ws.write_file(&format!("part{n}"), body);
        let part = ws.json(&[
            "upload-part",
            "--bucket",
            "dest",
            "--key",
            "logs/app.log",
            "--upload-id",
            &upload_id,
            "--part-number",
            &n.to_string(),
            "--file",
            path_arg(&file),
        ]);
        assert_eq!(part["part_number"], n);
        assert_eq!(part["size"], body.len());
    }

    let listed = ws.json(&[
        "list-parts",
        "--bucket",
        "dest",
        "--key",
        "logs/app.log",
        "--upload-id",
        &upload_id,
    ]);
    let numbers: Vec<u64> = listed["parts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["part_number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let completed = ws.json(&[
        "complete",
        "--bucket",
        "dest",
        "--key",
        "logs/app.log",
        "--upload-id",
        &upload_id,
        "--part",
        "1,2,3",
    ]);
    assert_eq!(completed["key"], "logs/app.log");

    let contents = fs::read_to_string(ws.object_path("dest", "logs/app.log")).unwrap();
    assert_eq!(contents, "alpha beta gamma");
}

#[test]
fn upload_part_reads_stdin() {
    let ws = Workspace::new();
    let upload_id = create(&ws, "piped");

    ws.cmd()
        .args([
            "upload-part",
            "--bucket",
            "dest",
            "--key",
            "piped",
            "--upload-id",
            &upload_id,
            "--part-number",
            "1",
        ])
        .write_stdin("from stdin")
        .assert()
        .success()
        .stdout(contains("\"size\": 10"));
}

#[test]
fn complete_rejects_out_of_order_parts() {
    let ws = Workspace::new();
    let upload_id = create(&ws, "unordered");

    ws.cmd()
        .args([
            "complete",
            "--bucket",
            "dest",
            "--key",
            "unordered",
            "--upload-id",
            &upload_id,
            "--part",
            "2,1",
        ])
        .assert()
        .failure()
        .stderr(contains("invalid part order"));
}

#[test]
fn abort_reports_deleted_objects() {
    let ws = Workspace::new();
    let upload_id = create(&ws, "dropped");
    let file = ws.write_file("body", "data");
    ws.json(&[
        "upload-part",
        "--bucket",
        "dest",
        "--key",
        "dropped",
        "--upload-id",
        &upload_id,
        "--part-number",
        "1",
        "--file",
        path_arg(&file),
    ]);

    let stats = ws.json(&[
        "abort",
        "--bucket",
        "dest",
        "--key",
        "dropped",
        "--upload-id",
        &upload_id,
    ]);
    assert_eq!(stats["scratch_deleted"], 2);
    assert!(!ws.object_path("dest", "dropped").exists());
}

#[test]
fn tagging_is_not_implemented() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["tagging", "get", "--bucket", "dest", "--key", "k"])
        .assert()
        .failure()
        .stderr(contains("not implemented: GetObjectTagging"));
    ws.cmd()
        .args([
            "tagging", "put", "--bucket", "dest", "--key", "k", "--tag", "env=prod",
        ])
        .assert()
        .failure()
        .stderr(contains("PutObjectTagging"));
}

#[test]
fn metrics_flag_prints_exposition() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["--metrics", "create", "--bucket", "dest", "--key", "m"])
        .assert()
        .success()
        .stderr(contains("splice_uploads_created_total 1"));
}

#[test]
fn missing_config_file_fails() {
    let ws = Workspace::new();

    Command::cargo_bin("splicectl")
        .unwrap()
        .env_remove("SPLICE_CONFIG")
        .args(["--config"])
        .arg(ws.dir.path().join("absent.toml"))
        .args(["create", "--bucket", "dest", "--key", "k"])
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}
