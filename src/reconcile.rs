//! Job status store and the table it renders.
//!
//! The table is a pure function of the last applied snapshot: every apply
//! discards the previous rows and rebuilds them in server order.

use crate::jobs::{Job, JobResult, JobStatus};

/// Styling of a progress indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressTone {
    Normal,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressCell {
    pub percent: u8,
    pub tone: ProgressTone,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionsCell {
    /// Play and download controls for a finished video.
    PlayDownload { url: String },
    Placeholder,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewCell {
    /// Inline base64 image and its decoded size estimate.
    Thumbnail { image: String, approx_bytes: usize },
    Placeholder,
}

/// One rendered row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRow {
    pub id: Option<String>,
    pub timestamp: String,
    pub kind: &'static str,
    pub status: JobStatus,
    pub kernel: String,
    pub factor: String,
    pub time: String,
    pub progress: Option<ProgressCell>,
    pub actions: ActionsCell,
    pub preview: PreviewCell,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobTable {
    pub rows: Vec<JobRow>,
}

/// Rebuild the whole table from a snapshot, keeping its order.
pub fn render(jobs: &[Job]) -> JobTable {
    JobTable {
        rows: jobs.iter().map(render_row).collect(),
    }
}

fn render_row(job: &Job) -> JobRow {
    let progress = job.progress_percent().map(|percent| ProgressCell {
        percent,
        tone: if job.status == JobStatus::Error {
            ProgressTone::Error
        } else {
            ProgressTone::Normal
        },
    });

    let actions = match job.result() {
        Some(JobResult::Video(url)) => ActionsCell::PlayDownload {
            url: url.to_string(),
        },
        _ => ActionsCell::Placeholder,
    };

    let preview = match job.inline_image() {
        Some(b64) => PreviewCell::Thumbnail {
            image: b64.to_string(),
            approx_bytes: b64.len() / 4 * 3,
        },
        None => PreviewCell::Placeholder,
    };

    JobRow {
        id: job.id.clone(),
        timestamp: job.timestamp.clone(),
        kind: job.kind.label(),
        status: job.status,
        kernel: job.kernel.map(|k| k.to_string()).unwrap_or_else(dash),
        factor: job
            .factor
            .as_ref()
            .map(|f| f.to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(dash),
        time: job.time.as_ref().map(|t| t.to_string()).unwrap_or_else(dash),
        progress,
        actions,
        preview,
    }
}

fn dash() -> String {
    "-".into()
}

/// Lifecycle violations observed between two snapshots of the same job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anomaly {
    ProgressRegressed { id: String, from: u8, to: u8 },
    StatusRegressed { id: String, from: JobStatus, to: JobStatus },
    TerminalChanged { id: String },
}

/// Compare jobs sharing an id across two snapshots.
///
/// Jobs without an id, and jobs that disappeared, are not checked.
pub fn anomalies(prev: &[Job], next: &[Job]) -> Vec<Anomaly> {
    let mut out = Vec::new();
    for new in next {
        let Some(id) = new.id.as_deref() else {
            continue;
        };
        let Some(old) = prev.iter().find(|p| p.id.as_deref() == Some(id)) else {
            continue;
        };
        if old.status.is_terminal() {
            if old != new {
                out.push(Anomaly::TerminalChanged { id: id.into() });
            }
            continue;
        }
        if new.status.rank() < old.status.rank() {
            out.push(Anomaly::StatusRegressed {
                id: id.into(),
                from: old.status,
                to: new.status,
            });
        }
        if let (Some(from), Some(to)) = (old.progress_percent(), new.progress_percent())
            && !new.status.is_terminal()
            && to < from
        {
            out.push(Anomaly::ProgressRegressed {
                id: id.into(),
                from,
                to,
            });
        }
    }
    out
}

/// Last successfully applied snapshot and its rendered table.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Vec<Job>,
    table: JobTable,
    applied_seq: u64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    /// Apply a fetched snapshot unless a newer one was already applied.
    ///
    /// Returns false when the snapshot was stale and discarded.
    pub fn apply(&mut self, seq: u64, jobs: Vec<Job>) -> bool {
        if seq <= self.applied_seq {
            tracing::debug!(
                "discarding stale snapshot #{seq} (applied #{})",
                self.applied_seq
            );
            return false;
        }
        for a in anomalies(&self.jobs, &jobs) {
            tracing::warn!("job lifecycle anomaly: {a:?}");
        }
        self.applied_seq = seq;
        self.table = render(&jobs);
        self.jobs = jobs;
        true
    }
}
