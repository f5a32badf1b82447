//! Immutable records of upstream submission attempts.
//!
//! One text file per attempt, named `<CHAIN>_<height>_<job>.txt`, written
//! outside the hot path and never rewritten.

use std::path::PathBuf;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct SubmissionLog {
    dir: PathBuf,
}

impl SubmissionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist one submission record; failures are logged, never raised,
    /// since bookkeeping must not affect submission flow.
    pub async fn record(&self, chain: &str, height: u64, job_id: &str, content: String) {
        let path = self.dir.join(format!("{chain}_{height}_{job_id}.txt"));

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("cannot create submission log dir {:?}: {}", self.dir, e);
            return;
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!("cannot write submission record {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = SubmissionLog::new(dir.path());
        log.record("RXD", 42, "689aa001", "header: 00".into()).await;

        let path = dir.path().join("RXD_42_689aa001.txt");
        let content = tokio::fs::read_to_string(path).await.unwrap();
        assert!(content.contains("header"));
    }
}
