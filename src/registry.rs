//! Job registry: name→job resolution with configuration merging.
//!
//! Built once at startup and read-only afterwards, so lookups need no
//! locking. Effective parameters are code-declared defaults overlaid by
//! configuration overrides; configuration wins on conflict. Dependency lists
//! are reported as-is — the registry never expands them into an execution
//! graph.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::JobDefinition;
use crate::error::{JobRigError, Result};
use crate::job::{Job, JobMetadata, JobParams};
use crate::lock::LockType;
use crate::trigger::Trigger;

/// Everything the scheduler needs to run one job.
#[derive(Clone)]
pub struct ResolvedJob {
    pub job: Arc<dyn Job>,
    pub metadata: JobMetadata,
    /// Declared defaults overlaid by configured overrides.
    pub params: JobParams,
    /// Configured dependency list, falling back to the declared one.
    pub depends_on: Vec<String>,
    pub lock: LockType,
    pub trigger: Option<Trigger>,
}

impl std::fmt::Debug for ResolvedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedJob")
            .field("metadata", &self.metadata)
            .field("params", &self.params)
            .field("depends_on", &self.depends_on)
            .field("lock", &self.lock)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

struct RegistryEntry {
    job: Arc<dyn Job>,
    metadata: JobMetadata,
    params: JobParams,
    depends_on: Vec<String>,
    lock: LockType,
    trigger: Option<Trigger>,
}

/// Immutable mapping from job name to runnable unit plus merged definition.
pub struct JobRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    /// Build the registry from registered jobs and configured definitions.
    ///
    /// Fails on a duplicate job name, on a definition keyed by an
    /// unregistered name, and on an unparseable trigger — startup either
    /// produces a complete registry or none at all.
    pub fn new(
        jobs: Vec<Arc<dyn Job>>,
        definitions: &HashMap<String, JobDefinition>,
    ) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for job in jobs {
            let metadata = job.metadata();
            let name = metadata.name.clone();
            if entries.contains_key(&name) {
                return Err(JobRigError::DuplicateJobName(name));
            }

            let definition = definitions.get(&name).cloned().unwrap_or_default();

            let mut params = metadata.default_params();
            params.extend(definition.params.clone());

            let depends_on = definition
                .depends_on
                .clone()
                .unwrap_or_else(|| metadata.depends_on.clone());

            let trigger = definition
                .trigger
                .as_ref()
                .map(Trigger::from_spec)
                .transpose()?;

            entries.insert(
                name,
                RegistryEntry {
                    job,
                    metadata,
                    params,
                    depends_on,
                    lock: definition.lock,
                    trigger,
                },
            );
        }

        for configured_name in definitions.keys() {
            if !entries.contains_key(configured_name) {
                return Err(JobRigError::InvalidJobDefinition {
                    job: configured_name.clone(),
                    reason: "no registered job with this name".to_string(),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Resolve a job by name.
    pub fn resolve(&self, name: &str) -> Result<ResolvedJob> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| JobRigError::UnknownJob(name.to_string()))?;

        Ok(ResolvedJob {
            job: Arc::clone(&entry.job),
            metadata: entry.metadata.clone(),
            params: entry.params.clone(),
            depends_on: entry.depends_on.clone(),
            lock: entry.lock,
            trigger: entry.trigger.clone(),
        })
    }

    /// Metadata for all registered jobs, ordered by name.
    pub fn list(&self) -> Vec<JobMetadata> {
        self.entries.values().map(|e| e.metadata.clone()).collect()
    }

    /// Registered names, ordered.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Names of jobs that carry a configured trigger, ordered.
    pub fn triggered_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.trigger.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobContext, JobResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct StubJob {
        metadata: JobMetadata,
    }

    impl StubJob {
        fn new(metadata: JobMetadata) -> Arc<dyn Job> {
            Arc::new(Self { metadata })
        }
    }

    #[async_trait]
    impl Job for StubJob {
        fn metadata(&self) -> JobMetadata {
            self.metadata.clone()
        }

        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<JobResult> {
            Ok(JobResult::success(&self.metadata.name))
        }
    }

    #[test]
    fn test_config_overrides_win_over_defaults() {
        let job = StubJob::new(
            JobMetadata::named("sync")
                .param("batch_size", json!(100))
                .param("dry_run", json!(false)),
        );

        let mut definitions = HashMap::new();
        definitions.insert(
            "sync".to_string(),
            JobDefinition {
                params: HashMap::from([("batch_size".to_string(), json!(500))]),
                ..Default::default()
            },
        );

        let registry = JobRegistry::new(vec![job], &definitions).unwrap();
        let resolved = registry.resolve("sync").unwrap();

        assert_eq!(resolved.params["batch_size"], json!(500));
        assert_eq!(resolved.params["dry_run"], json!(false));
    }

    #[test]
    fn test_absent_definition_means_defaults_and_local_lock() {
        let job = StubJob::new(JobMetadata::named("sync").param("limit", json!(10)));
        let registry = JobRegistry::new(vec![job], &HashMap::new()).unwrap();

        let resolved = registry.resolve("sync").unwrap();
        assert_eq!(resolved.lock, LockType::Local);
        assert_eq!(resolved.params["limit"], json!(10));
        assert!(resolved.trigger.is_none());
    }

    #[test]
    fn test_depends_on_override() {
        let job = StubJob::new(JobMetadata::named("sync").depends_on("prepare"));

        let mut definitions = HashMap::new();
        definitions.insert(
            "sync".to_string(),
            JobDefinition {
                depends_on: Some(vec!["extract".to_string(), "load".to_string()]),
                ..Default::default()
            },
        );

        let registry = JobRegistry::new(vec![job], &definitions).unwrap();
        assert_eq!(
            registry.resolve("sync").unwrap().depends_on,
            vec!["extract".to_string(), "load".to_string()]
        );
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let a = StubJob::new(JobMetadata::named("sync"));
        let b = StubJob::new(JobMetadata::named("sync"));

        let err = JobRegistry::new(vec![a, b], &HashMap::new()).unwrap_err();
        assert!(matches!(err, JobRigError::DuplicateJobName(name) if name == "sync"));
    }

    #[test]
    fn test_unknown_job_on_resolve() {
        let registry = JobRegistry::new(vec![], &HashMap::new()).unwrap();
        let err = registry.resolve("ghost").unwrap_err();
        assert!(matches!(err, JobRigError::UnknownJob(name) if name == "ghost"));
    }

    #[test]
    fn test_definition_for_unregistered_job_fails_startup() {
        let mut definitions = HashMap::new();
        definitions.insert("ghost".to_string(), JobDefinition::default());

        let err = JobRegistry::new(vec![], &definitions).unwrap_err();
        assert!(matches!(err, JobRigError::InvalidJobDefinition { job, .. } if job == "ghost"));
    }

    #[test]
    fn test_list_is_ordered_by_name() {
        let jobs = vec![
            StubJob::new(JobMetadata::named("zeta")),
            StubJob::new(JobMetadata::named("alpha")),
            StubJob::new(JobMetadata::named("mid")),
        ];
        let registry = JobRegistry::new(jobs, &HashMap::new()).unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
