use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

/// Assert command succeeded
#[macro_export]
macro_rules! assert_command_success {
    ($output:expr) => {
        assert!(
            $output.success,
            "Command failed with exit code {}\nstdout: {}\nstderr: {}",
            $output.exit_code, $output.stdout, $output.stderr
        );
    };
}

/// Isolated shelf root driven through the `shelf` binary.
pub struct TestFixture {
    pub temp_dir: TempDir,
    /// Project root (temp_dir path)
    pub root: PathBuf,
    /// Shelf root directory (./.shelf)
    pub shelf_root: PathBuf,
    start_time: Instant,
    test_name: String,
}

pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Parse stdout as the JSON envelope.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|err| panic!("stdout is not JSON ({err}):\n{}", self.stdout))
    }
}

impl TestFixture {
    pub fn new(test_name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let shelf_root = root.join(".shelf");
        std::fs::create_dir_all(&shelf_root).expect("Failed to create shelf root");

        println!("\n{}", "=".repeat(70));
        println!("[FIXTURE] Test: {test_name}");
        println!("[FIXTURE] Shelf root: {shelf_root:?}");
        println!("{}", "=".repeat(70));

        Self {
            temp_dir,
            root,
            shelf_root,
            start_time: Instant::now(),
            test_name: test_name.to_string(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.shelf_root.join("shelf.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.shelf_root.join("backups")
    }

    /// Run the shelf CLI and capture output
    pub fn run_shelf(&self, args: &[&str]) -> CommandOutput {
        let start = Instant::now();
        println!("\n[CMD] shelf {}", args.join(" "));

        let output = Command::new(env!("CARGO_BIN_EXE_shelf"))
            .args(args)
            .env("HOME", &self.root)
            .env("SHELF_ROOT", &self.shelf_root)
            .env_remove("SHELF_CONFIG")
            .env_remove("RUST_LOG")
            .current_dir(&self.root)
            .output()
            .expect("Failed to execute shelf command");

        let elapsed = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        println!("[CMD] Exit code: {exit_code}");
        println!("[CMD] Timing: {elapsed:?}");
        if !stdout.is_empty() {
            println!("[STDOUT]\n{stdout}");
        }
        if !stderr.is_empty() {
            println!("[STDERR]\n{stderr}");
        }

        CommandOutput {
            success: output.status.success(),
            exit_code,
            stdout,
            stderr,
            elapsed,
        }
    }

    /// Write a legacy export under the fixture root.
    pub fn write_legacy(&self, name: &str, content: &Value) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(content).unwrap())
            .expect("Failed to write legacy export");
        println!("[FIXTURE] Legacy export: {path:?}");
        path
    }

    pub fn open_db(&self) -> Connection {
        Connection::open(self.db_path()).expect("Failed to open db")
    }

    pub fn count(&self, table: &str) -> i64 {
        self.open_db()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .expect("Failed to count rows")
    }

    pub fn has_sqlite3() -> bool {
        which::which("sqlite3").is_ok()
    }

    pub fn list_dir(path: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(path)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        println!(
            "[FIXTURE] {} finished in {:?}",
            self.test_name,
            self.start_time.elapsed()
        );
    }
}
