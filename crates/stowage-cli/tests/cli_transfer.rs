use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{tempdir, TempDir};

struct TestContext {
    _work: TempDir,
    config_dir: PathBuf,
    workspace_root: PathBuf,
    sources: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let work = tempdir().expect("tempdir");
        let config_dir = work.path().join("config");
        let sources = work.path().join("sources");
        fs::create_dir_all(&config_dir).expect("config dir");
        fs::create_dir_all(&sources).expect("sources dir");
        Self {
            workspace_root: work.path().join("transfers"),
            config_dir,
            sources,
            _work: work,
        }
    }

    fn source(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.sources.join(name);
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write source file");
        }
        fs::create_dir_all(&root).expect("source root");
        root
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_stowage"));
        cmd.arg("--config-dir").arg(&self.config_dir);
        cmd.env_remove("STOWAGE_CONFIG_DIR");
        cmd
    }

    fn transfer(&self, paths: &[&Path], extra: &[&str]) -> Output {
        let mut cmd = self.command();
        cmd.arg("transfer")
            .arg("--workspace-root")
            .arg(&self.workspace_root)
            .args(extra)
            .args(paths);
        cmd.output().expect("run stowage")
    }
}

#[test]
fn transfer_emits_json_report_and_builds_workspace() {
    let ctx = TestContext::new();
    let src = ctx.source(
        "album",
        &[("a.txt", "alpha"), ("nested/b.txt", "bravo!"), ("nested/deeper/c.txt", "c")],
    );

    let output = ctx.transfer(&[&src], &["--json", "--batch-size", "2"]);
    assert!(
        output.status.success(),
        "stowage transfer failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("one report line")).expect("json");
    assert_eq!(report["fileCount"], 3);
    assert_eq!(report["totalBytes"], 12);
    assert_eq!(report["size"], "12 B");
    assert_eq!(report["batchSize"], 2);

    let ws = ctx.workspace_root.join("album");
    assert_eq!(fs::read_to_string(ws.join("temp/nested/b.txt")).unwrap(), "bravo!");
    assert!(ws.join("metadata.json").is_file());
    assert!(ws.join("final.zip").is_file());
}

#[test]
fn text_output_names_the_workspace() {
    let ctx = TestContext::new();
    let src = ctx.source("docs", &[("readme.md", "# hi")]);

    let output = ctx.transfer(&[&src], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Transferred"), "unexpected output: {stdout}");
    assert!(stdout.contains("1 file(s)"), "unexpected output: {stdout}");
}

#[test]
fn missing_path_exits_with_client_code() {
    let ctx = TestContext::new();
    let missing = ctx.sources.join("nope");

    let output = ctx.transfer(&[&missing], &[]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope"), "stderr should name the path: {stderr}");
    assert!(!ctx.workspace_root.join("nope").exists());
}

#[test]
fn zero_batch_size_is_rejected() {
    let ctx = TestContext::new();
    let src = ctx.source("one", &[("x", "x")]);

    let output = ctx.transfer(&[&src], &["--batch-size", "0"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn zero_concurrency_override_is_rejected() {
    let ctx = TestContext::new();
    let src = ctx.source("one", &[("x", "x")]);

    let output = ctx.transfer(&[&src], &["--max-concurrency", "0"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_concurrency"), "stderr: {stderr}");
}

#[test]
fn one_bad_path_does_not_stop_the_others() {
    let ctx = TestContext::new();
    let good = ctx.source("good", &[("keep.txt", "kept")]);
    let bad = ctx.sources.join("absent");

    let output = ctx.transfer(&[&good, &bad], &["--json", "--max-concurrency", "1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(ctx.workspace_root.join("good/final.zip").is_file());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1);
}

#[test]
fn config_command_reflects_config_file() {
    let ctx = TestContext::new();
    fs::write(
        ctx.config_dir.join("stowage.toml"),
        "batch_size = 3\nmax_concurrency = 7\n",
    )
    .unwrap();

    let output = ctx.command().arg("config").output().expect("run stowage");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("batch_size = 3"), "stdout: {stdout}");
    assert!(stdout.contains("max_concurrency = 7"), "stdout: {stdout}");
    assert!(stdout.contains("workspace_root = \"transfers\""), "stdout: {stdout}");
}

#[test]
fn explicit_config_file_wins_over_config_dir() {
    let ctx = TestContext::new();
    fs::write(ctx.config_dir.join("stowage.toml"), "batch_size = 3\n").unwrap();
    let explicit = ctx.sources.join("other.toml");
    fs::write(&explicit, "batch_size = 5\n").unwrap();

    let output = ctx
        .command()
        .arg("--config")
        .arg(&explicit)
        .arg("config")
        .output()
        .expect("run stowage");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("batch_size = 5"), "stdout: {stdout}");
}

#[test]
fn malformed_config_exits_with_client_code() {
    let ctx = TestContext::new();
    fs::write(ctx.config_dir.join("stowage.toml"), "batch_size = \"many\"\n").unwrap();

    let output = ctx.command().arg("config").output().expect("run stowage");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn paths_sharing_a_directory_name_do_not_share_a_workspace() {
    let ctx = TestContext::new();
    let first = ctx.source("one/data", &[("first.txt", "from one")]);
    let second = ctx.source("two/data", &[("second.txt", "from two")]);

    let output = ctx.transfer(&[&first, &second], &["--json"]);
    assert_eq!(output.status.code(), Some(2));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1, "only the first path runs: {stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already the target"), "stderr: {stderr}");

    let ws = ctx.workspace_root.join("data");
    assert_eq!(fs::read_to_string(ws.join("temp/first.txt")).unwrap(), "from one");
    assert!(!ws.join("temp/second.txt").exists());
}
