//! Shared helpers for sc64deck core integration tests.
//!
//! Provides a fake `sc64deployer` shell script that emulates the `sd`
//! subcommands against a scratch directory standing in for the SD card, plus
//! process liveness checks.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sc64deck_core::config::DeployerConfig;
use tempfile::TempDir;

/// A fake deployer executable plus the directory acting as the SD card.
pub struct FakeDeployer {
    pub dir: TempDir,
    pub executable: PathBuf,
    pub card: PathBuf,
}

impl FakeDeployer {
    /// Configuration pointing at the fake executable with a short grace period.
    pub fn config(&self) -> DeployerConfig {
        let mut config = DeployerConfig::with_executable(&self.executable);
        config.cancel_grace_ms = 500;
        config.progress_poll_ms = 20;
        config
    }

    /// Absolute host path of a remote path on the fake card.
    pub fn card_path(&self, remote: &str) -> PathBuf {
        self.card.join(remote.trim_start_matches('/'))
    }

    /// A scratch path outside the card.
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Write an executable shell script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// Create a fake `sc64deployer`.
///
/// Any remote path containing `slow` sleeps for half a second before acting,
/// and any containing `hang` never finishes on its own.
pub fn fake_deployer() -> FakeDeployer {
    let dir = tempfile::tempdir().expect("tempdir");
    let card = dir.path().join("card");
    fs::create_dir(&card).expect("create card dir");

    let body = format!(
        r#"#!/bin/sh
ROOT='{root}'
if [ "$1" != "sd" ]; then
  echo "Error: unknown command $1" >&2
  exit 2
fi
cmd="$2"
shift 2
for arg in "$@"; do
  case "$arg" in
    *hang*) sleep 30 ;;
    *slow*) sleep 0.5 ;;
  esac
done
case "$cmd" in
  ls)
    dir="$ROOT$1"
    if [ ! -d "$dir" ]; then
      echo "Error: No such file or directory" >&2
      exit 1
    fi
    for f in "$dir"/*; do
      [ -e "$f" ] || continue
      name=$(basename "$f")
      if [ -d "$f" ]; then
        echo "d ---- 2025-08-01 15:13:48 | $name"
      else
        size=$(wc -c < "$f" | tr -d ' ')
        echo "f $size 2024-05-07 17:53:52 | $name"
      fi
    done
    ;;
  upload)
    cp "$1" "$ROOT$2" || exit 1
    ;;
  download)
    if [ ! -e "$ROOT$1" ]; then
      echo "Error: No such file or directory" >&2
      exit 1
    fi
    cp "$ROOT$1" "$2" || exit 1
    ;;
  rm)
    target="$ROOT$1"
    if [ -d "$target" ]; then
      if [ -n "$(ls -A "$target")" ]; then
        echo "Error: directory not empty" >&2
        exit 1
      fi
      rmdir "$target"
    elif [ -e "$target" ]; then
      rm "$target"
    else
      echo "Error: No such file or directory" >&2
      exit 1
    fi
    ;;
  mkdir)
    mkdir "$ROOT$1" 2>/dev/null || {{ echo "Error: could not create $1" >&2; exit 1; }}
    ;;
  mv)
    if [ ! -e "$ROOT$1" ]; then
      echo "Error: No such file or directory" >&2
      exit 1
    fi
    mv "$ROOT$1" "$ROOT$2"
    ;;
  stat)
    target="$ROOT$1"
    if [ -d "$target" ]; then
      echo "d ---- 2025-08-01 15:13:48 | $1"
    elif [ -e "$target" ]; then
      echo "f $(wc -c < "$target" | tr -d ' ') 2024-05-07 17:53:52 | $1"
    else
      echo "Error: No such file or directory" >&2
      exit 1
    fi
    ;;
  *)
    echo "Error: unknown sd command $cmd" >&2
    exit 2
    ;;
esac
"#,
        root = card.display()
    );
    let executable = write_script(dir.path(), "sc64deployer", &body);
    FakeDeployer {
        dir,
        executable,
        card,
    }
}

/// Whether `pid` is gone: no such process, or a zombie awaiting its reaper.
pub fn process_gone(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Err(Errno::ESRCH) => true,
        _ => is_zombie(pid),
    }
}

fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state follows the parenthesised command name.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

/// Poll until `pid` is gone or `within` elapses.
pub async fn wait_until_gone(pid: i32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if process_gone(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Read a pid written by a test script, waiting for the file to appear.
pub async fn read_pid_file(path: &Path) -> i32 {
    for _ in 0..100 {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pid file {} never written", path.display());
}
