use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::{Artifact, ArtifactError, ArtifactStore, LoggedArtifact, fs_ops};

/// Persisted record of one pipeline step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub entity: String,
    pub project: String,
    pub job_type: String,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    /// Qualified names (`name:vN`) of artifacts consumed.
    #[serde(default)]
    pub used: Vec<String>,
    /// Qualified names (`name:vN`) of artifacts produced.
    #[serde(default)]
    pub logged: Vec<String>,
}

/// A live run; every use/log is appended to its record on disk.
#[derive(Debug)]
pub struct Run {
    store: ArtifactStore,
    record: RunRecord,
    path: PathBuf,
}

impl Run {
    pub fn init(store: &ArtifactStore, job_type: &str) -> Result<Self, ArtifactError> {
        let id = Uuid::new_v4().simple().to_string();
        let record = RunRecord {
            id: id.clone(),
            entity: store.entity().to_string(),
            project: store.project().to_string(),
            job_type: job_type.to_string(),
            started_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            finished_at: None,
            used: Vec::new(),
            logged: Vec::new(),
        };
        let path = store.runs_dir().join(format!("{id}.json"));
        fs_ops::write_json_atomic(&path, &record)?;
        tracing::info!(run = %id, job_type, project = store.project(), "run started");
        Ok(Self {
            store: store.clone(),
            record,
            path,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Resolve an artifact reference and record it as an input of this run.
    pub fn use_artifact(&mut self, reference: &str) -> Result<LoggedArtifact, ArtifactError> {
        let artifact = self.store.resolve(reference)?;
        self.record.used.push(artifact.qualified_name());
        self.save()?;
        tracing::info!(run = %self.record.id, artifact = %artifact.qualified_name(), "using artifact");
        Ok(artifact)
    }

    /// Log an artifact produced by this run.
    pub fn log_artifact(&mut self, artifact: Artifact) -> Result<LoggedArtifact, ArtifactError> {
        let logged = self.store.log_from(artifact, Some(&self.record.id))?;
        self.record.logged.push(logged.qualified_name());
        self.save()?;
        Ok(logged)
    }

    /// Stamp the finish time and return the final record.
    pub fn finish(mut self) -> Result<RunRecord, ArtifactError> {
        self.record.finished_at = Some(OffsetDateTime::now_utc().format(&Rfc3339)?);
        self.save()?;
        tracing::info!(run = %self.record.id, "run finished");
        Ok(self.record)
    }

    fn save(&self) -> Result<(), ArtifactError> {
        fs_ops::write_json_atomic(&self.path, &self.record)
    }
}
