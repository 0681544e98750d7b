//! Test harness for isolated test execution.
//!
//! `TestHarness` owns a temporary directory holding the SQLite database and
//! any media or layout files a test writes, plus a `Postman` wired to an
//! in-memory transport.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use postman::db::template_repo::{self, TemplateRow};
use postman::{Database, MemoryTransport, Postman, PostmanConfig, QueueMode};

pub struct TestHarness {
    temp_dir: TempDir,
    pub transport: Arc<MemoryTransport>,
    pub postman: Postman,
}

impl TestHarness {
    /// Harness with default settings and immediate delivery.
    pub fn new() -> Self {
        Self::with_config(PostmanConfig::default())
    }

    pub fn with_config(config: PostmanConfig) -> Self {
        Self::with_mode(config, QueueMode::Immediate)
    }

    pub fn with_mode(config: PostmanConfig, mode: QueueMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("data").join("postman.db"))
            .expect("Failed to open test database");
        let transport = Arc::new(MemoryTransport::new());

        let postman = Postman::builder(config)
            .database(db)
            .transport(transport.clone())
            .queue_mode(mode)
            .build()
            .expect("Failed to build postman");

        Self {
            temp_dir,
            transport,
            postman,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a file below the harness directory and returns its path.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    pub fn seed_template(&self, template: TemplateRow) -> i64 {
        template_repo::insert(self.postman.database(), &template).expect("Failed to seed template")
    }

    /// Stops background delivery, if any.
    pub fn finish(self) {
        self.postman.shutdown();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
