//! Publisher and intelligence extractor that only emit log events.

use async_trait::async_trait;
use tracing::info;

use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;
use sigil_entity::scan::ScanOutput;

use crate::collaborators::{IntelligenceExtractor, Publisher};

/// Logs every published result and every high-risk finding set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl Publisher for LogSink {
    async fn publish(
        &self,
        result_id: &str,
        job: &ScanJob,
        output: &ScanOutput,
    ) -> AppResult<()> {
        info!(
            target: "sigil_bot::publish",
            result_id = %result_id,
            ecosystem = %job.ecosystem,
            name = %job.name,
            version = %job.version,
            verdict = %output.verdict,
            score = output.score,
            rescan = job.metadata.is_rescan(),
            "Scan result published"
        );
        Ok(())
    }
}

#[async_trait]
impl IntelligenceExtractor for LogSink {
    async fn extract(&self, job: &ScanJob, output: &ScanOutput) -> AppResult<()> {
        if output.verdict.is_high_risk() {
            info!(
                target: "sigil_bot::intel",
                ecosystem = %job.ecosystem,
                name = %job.name,
                version = %job.version,
                verdict = %output.verdict,
                findings = output.findings_count(),
                previous_verdict = job.metadata.previous_verdict().unwrap_or(""),
                "High-risk package observed"
            );
        }
        Ok(())
    }
}
