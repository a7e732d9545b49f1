use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use appcache_manifest::{GenerateError, GenerateOptions, generate_in};
use tempfile::{TempDir, tempdir};

const DIGEST_WS1: &str = "7e23edcaae22a404a2e489278ee133f3";
const DIGEST_BOTH: &str = "7ccc78fc61b9f1daff3b91e263772392";

fn workspace() -> TempDir {
  let dir = tempdir().unwrap();
  let files = [
    ("test-ws1/a.txt", "AAA"),
    ("test-ws1/b.txt", "BBB"),
    ("test-ws1/c.dat", "Not includes"),
    ("test-ws1/d/d.txt", "DDD"),
    ("test-ws1/post1", "POST1"),
    ("test-ws1/post2", "POST2"),
    ("test-ws2/a.txt", "AAA"),
    ("test-ws2/b.txt", "BBB"),
    ("test-ws2/c.dat", "Not includes"),
    ("test-ws2/d/d.txt", "DDD"),
  ];
  for (path, content) in files {
    let path = dir.path().join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }
  dir
}

fn ws1_manifest() -> String {
  format!("CACHE MANIFEST\n/a.txt\n/b.txt\n/d/d.txt\n#{DIGEST_WS1}\n")
}

async fn render(root: &Path, patterns: &[&str], options: GenerateOptions) -> String {
  let collected = generate_in(root, patterns, &options).unwrap().collect().await;
  assert!(collected.errors.is_empty(), "{:?}", collected.errors);
  collected.text()
}

fn postfiles(names: &[&str]) -> Vec<PathBuf> {
  names.iter().map(PathBuf::from).collect()
}

#[tokio::test]
async fn single_glob() {
  let dir = workspace();
  let text = render(dir.path(), &["test-ws1/**/*.txt"], GenerateOptions::default()).await;
  assert_eq!(text, ws1_manifest());
}

#[tokio::test]
async fn multiple_globs_share_their_parent() {
  let dir = workspace();
  let text = render(
    dir.path(),
    &["test-ws1/**/*.txt", "test-ws2/**/*.txt"],
    GenerateOptions::default(),
  )
  .await;
  assert_eq!(
    text,
    format!(
      "CACHE MANIFEST\n/test-ws1/a.txt\n/test-ws1/b.txt\n/test-ws1/d/d.txt\n\
       /test-ws2/a.txt\n/test-ws2/b.txt\n/test-ws2/d/d.txt\n#{DIGEST_BOTH}\n"
    )
  );
}

#[tokio::test]
async fn prefix_is_joined_before_paths() {
  let dir = workspace();
  let options = GenerateOptions {
    prefix: "/z".into(),
    ..GenerateOptions::default()
  };
  let text = render(dir.path(), &["test-ws1/**/*.txt"], options).await;
  assert_eq!(
    text,
    format!("CACHE MANIFEST\n/z/a.txt\n/z/b.txt\n/z/d/d.txt\n#{DIGEST_WS1}\n")
  );
}

#[tokio::test]
async fn postfiles_follow_the_fingerprint_in_order() {
  let dir = workspace();

  let one = GenerateOptions {
    postfiles: postfiles(&["test-ws1/post1"]),
    ..GenerateOptions::default()
  };
  assert_eq!(
    render(dir.path(), &["test-ws1/**/*.txt"], one).await,
    format!("{}POST1\n", ws1_manifest())
  );

  let two = GenerateOptions {
    postfiles: postfiles(&["test-ws1/post1", "test-ws1/post2"]),
    ..GenerateOptions::default()
  };
  assert_eq!(
    render(dir.path(), &["test-ws1/**/*.txt"], two).await,
    format!("{}POST1\nPOST2\n", ws1_manifest())
  );
}

#[tokio::test]
async fn network_star_comes_last() {
  let dir = workspace();

  let alone = GenerateOptions {
    network_star: true,
    ..GenerateOptions::default()
  };
  assert_eq!(
    render(dir.path(), &["test-ws1/**/*.txt"], alone).await,
    format!("{}NETWORK:\n*\n", ws1_manifest())
  );

  let with_postfile = GenerateOptions {
    network_star: true,
    postfiles: postfiles(&["test-ws1/post1"]),
    ..GenerateOptions::default()
  };
  assert_eq!(
    render(dir.path(), &["test-ws1/**/*.txt"], with_postfile).await,
    format!("{}POST1\nNETWORK:\n*\n", ws1_manifest())
  );
}

#[tokio::test]
async fn stamp_replaces_the_fingerprint() {
  let dir = workspace();
  let options = GenerateOptions {
    stamp: true,
    ..GenerateOptions::default()
  };
  let text = render(dir.path(), &["test-ws1/**/*.txt"], options).await;
  assert!(text.contains("# Created at "));
  assert!(!text.contains(DIGEST_WS1));
}

#[tokio::test]
async fn missing_postfile_is_reported() {
  let dir = workspace();
  let options = GenerateOptions {
    postfiles: postfiles(&["test-ws1/post3"]),
    ..GenerateOptions::default()
  };

  let mut sink = Vec::new();
  let result = generate_in(dir.path(), &["test-ws1/**/*.txt"], &options)
    .unwrap()
    .write_to(&mut sink)
    .await;
  assert!(matches!(result, Err(GenerateError::Source(_))));
}

#[tokio::test]
async fn repeated_runs_are_identical() {
  let dir = workspace();
  let first = render(dir.path(), &["test-ws1/**/*.txt"], GenerateOptions::default()).await;
  let second = render(dir.path(), &["test-ws1/**/*.txt"], GenerateOptions::default()).await;
  assert_eq!(first, second);
}

fn run_cli(root: &Path, args: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_appcache-manifest"))
    .args(args)
    .current_dir(root)
    .stdin(Stdio::null())
    .output()
    .unwrap()
}

#[test]
fn cli_prints_to_stdout() {
  let dir = workspace();
  let output = run_cli(dir.path(), &["test-ws1/**/*.txt"]);
  assert!(output.status.success());
  assert_eq!(String::from_utf8(output.stdout).unwrap(), ws1_manifest());
}

#[test]
fn cli_writes_nested_output_files() {
  let dir = workspace();
  let output = run_cli(dir.path(), &[
    "test-ws1/**/*.txt",
    "--output",
    "test-ws3/test.appcache",
  ]);
  assert!(output.status.success());
  assert_eq!(
    fs::read_to_string(dir.path().join("test-ws3/test.appcache")).unwrap(),
    ws1_manifest()
  );
}

#[test]
fn cli_rejects_invalid_arguments() {
  let dir = workspace();
  let cases: [&[&str]; 4] = [
    &["test-ws1/**/*.txt", "--prefix", "z"],
    &["test-ws1/**/*.txt", "--prefix", "/z", "--prefix", "/y"],
    &["test-ws1/**/*.txt", "--verbose"],
    &["test-ws1/**/*.txt", "--watch"],
  ];
  for args in cases {
    assert!(!run_cli(dir.path(), args).status.success(), "{args:?}");
  }
}

#[test]
fn cli_fails_on_missing_postfile() {
  let dir = workspace();
  let output = run_cli(dir.path(), &["test-ws1/**/*.txt", "--postfile", "test-ws1/post3"]);
  assert!(!output.status.success());
}

#[test]
fn cli_reads_the_configuration_file() {
  let dir = workspace();
  fs::write(
    dir.path().join("appcache.config.json"),
    r#"{"prefix": "/z", "postfile": "test-ws1/post1"}"#,
  )
  .unwrap();

  let output = run_cli(dir.path(), &["test-ws1/**/*.txt", "--network-star"]);
  assert!(output.status.success());
  assert_eq!(
    String::from_utf8(output.stdout).unwrap(),
    format!("CACHE MANIFEST\n/z/a.txt\n/z/b.txt\n/z/d/d.txt\n#{DIGEST_WS1}\nPOST1\nNETWORK:\n*\n")
  );
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if ready() {
      return true;
    }
    thread::sleep(Duration::from_millis(20));
  }
  ready()
}

#[test]
fn cli_watch_mode_closes_on_kill() {
  let dir = workspace();
  let manifest = dir.path().join("test-ws3/test.appcache");
  let mut child = Command::new(env!("CARGO_BIN_EXE_appcache-manifest"))
    .args(["test-ws1/**/*.txt", "--output", "test-ws3/test.appcache", "--watch"])
    .current_dir(dir.path())
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .unwrap();

  let generated = wait_until(Duration::from_secs(10), || {
    fs::read_to_string(&manifest).is_ok_and(|text| text == ws1_manifest())
  });
  assert!(generated, "initial manifest was not written");

  child.stdin.as_mut().unwrap().write_all(b"KILL").unwrap();
  let exited = wait_until(Duration::from_secs(10), || {
    child.try_wait().unwrap().is_some()
  });
  if !exited {
    let _ = child.kill();
  }
  assert!(exited, "watch mode did not close");
  assert!(child.wait().unwrap().success());
}
