//! Run record storage
//!
//! Persists test runs as one JSON file per run so that separate invocations
//! (an `execute` in one process, a `stop` in another) share run state. Each
//! run also has a `.lock` file; holding an exclusive advisory lock on it
//! serializes read-modify-write cycles across processes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{RunStatus, TestRun};
use crate::registry::{RunStore, StoreLock};
use crate::utils::fs::file_safe;

/// JSON file backed run store
pub struct JsonRunStore {
    /// Base directory for run records
    base_dir: PathBuf,
}

impl JsonRunStore {
    /// Create a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with default directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perf-orchestrator")
            .join("runs");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure storage directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create run directory: {}", self.base_dir.display())
        })?;
        Ok(())
    }

    /// Get path for a specific run
    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", file_safe(run_id)))
    }

    fn lock_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.lock", file_safe(run_id)))
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<TestRun> {
        let file = File::open(path).context("Failed to open run file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse run file: {}", path.display()))
    }

    /// Brief information on every stored run
    pub fn list_info(&self) -> Result<Vec<RunInfo>> {
        Ok(self.list()?.iter().map(RunInfo::from_run).collect())
    }

    /// Delete a run
    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted run record: {}", path.display());
        }
        match fs::remove_file(self.lock_path(run_id)) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                debug!("Failed to remove lock file for {}: {}", run_id, e)
            }
            _ => {}
        }
        Ok(())
    }

    /// Export run to a file
    pub fn export(&self, run: &TestRun, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "run_id",
                    "test_id",
                    "status",
                    "total",
                    "success_count",
                    "failure_count",
                    "mean_ms",
                    "error",
                ])?;

                for (test_id, status) in &run.statuses {
                    let result = run.result(*test_id);
                    writer.write_record([
                        run.id.clone(),
                        test_id.to_string(),
                        status.to_string(),
                        result.map(|r| r.total.to_string()).unwrap_or_default(),
                        result
                            .map(|r| r.success_count.to_string())
                            .unwrap_or_default(),
                        result
                            .map(|r| r.failure_count.to_string())
                            .unwrap_or_default(),
                        result
                            .and_then(|r| r.timing.as_ref())
                            .map(|t| format!("{:.2}", t.mean_ms))
                            .unwrap_or_default(),
                        run.errors.get(test_id).cloned().unwrap_or_default(),
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported run to {}", path.display());
        Ok(())
    }
}

impl RunStore for JsonRunStore {
    fn load(&self, run_id: &str) -> Result<Option<TestRun>> {
        let path = self.run_path(run_id);
        match File::open(&path) {
            Ok(file) => {
                let run = serde_json::from_reader(BufReader::new(file))
                    .with_context(|| format!("Failed to parse run file: {}", path.display()))?;
                debug!("Loaded run from {}", path.display());
                Ok(Some(run))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to open run file: {}", path.display()))
            }
        }
    }

    /// Written to a temp file and renamed so readers never see a partial run
    fn save(&self, run: &TestRun) -> Result<()> {
        self.ensure_dir()?;

        let path = self.run_path(&run.id);
        // unique per writer so concurrent saves never share a temp file
        let tmp = path.with_extension(format!(
            "json.{}.{:08x}.tmp",
            std::process::id(),
            rand::random::<u32>()
        ));
        {
            let file = File::create(&tmp).context("Failed to create run file")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, run).context("Failed to write run")?;
            writer.flush().context("Failed to flush run file")?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e)
                .with_context(|| format!("Failed to replace run file: {}", path.display()));
        }

        debug!("Saved run to {}", path.display());
        Ok(())
    }

    fn list(&self) -> Result<Vec<TestRun>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.load_from_path(&path) {
                    Ok(run) => runs.push(run),
                    Err(e) => {
                        debug!("Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    fn lock_run(&self, run_id: &str) -> Result<StoreLock> {
        self.ensure_dir()?;

        let path = self.lock_path(run_id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        fs2::FileExt::lock_exclusive(&file)
            .with_context(|| format!("Failed to lock run file: {}", path.display()))?;
        Ok(StoreLock::file(file))
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tests: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
}

impl RunInfo {
    pub fn from_run(run: &TestRun) -> Self {
        Self {
            id: run.id.clone(),
            created_at: run.created_at,
            updated_at: run.updated_at,
            tests: run.statuses.len(),
            completed: run.count(RunStatus::Completed),
            failed: run.count(RunStatus::Error),
            active: run.count(RunStatus::Pending)
                + run.count(RunStatus::Started)
                + run.count(RunStatus::Stopping),
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

/// Generate unique run ID
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}
