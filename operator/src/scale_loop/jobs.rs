use resources::objects::{
    job::{Job, JobPhase},
    scaled_job::ScaledJob,
    Metadata, Object, SCALED_JOB_NAME_LABEL,
};

/// New executions to submit this cycle. Running executions are never
/// pre-empted: when more are running than the spec allows, the count
/// clamps at zero and the excess drains on its own.
pub fn dispatch_count(desired: u32, running: u32, max_replicas: u32) -> u32 {
    desired.min(max_replicas).saturating_sub(running)
}

/// Pending + Running executions owned by this target.
pub fn running_executions<'a>(jobs: impl Iterator<Item = &'a Job>, owner: &ScaledJob) -> u32 {
    jobs.filter(|job| owned_by(job, owner) && job.is_active())
        .count() as u32
}

fn owned_by(job: &Job, owner: &ScaledJob) -> bool {
    job.metadata
        .labels
        .get(SCALED_JOB_NAME_LABEL)
        .map_or(false, |name| name == owner.name())
        && job.namespace() == owner.namespace()
}

/// Instantiates the job template with a fresh unique name.
pub fn build_job(scaled_job: &ScaledJob) -> Job {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let mut labels = scaled_job.spec.job_template.labels.clone();
    labels.insert(SCALED_JOB_NAME_LABEL, scaled_job.name());
    Job {
        metadata: Metadata {
            name: format!("{}-{}", scaled_job.name(), &suffix[..8]),
            namespace: scaled_job.namespace().to_owned(),
            labels,
            owner_references: vec![resources::objects::object_reference::ObjectReference {
                kind: scaled_job.kind().to_string(),
                name: scaled_job.name().to_owned(),
            }],
            ..Metadata::default()
        },
        spec: scaled_job.spec.job_template.spec.clone(),
        status: None,
    }
}

/// Names of completed executions past the history limit for `phase`,
/// oldest first.
pub fn history_to_prune<'a>(
    jobs: impl Iterator<Item = &'a Job>,
    owner: &ScaledJob,
    phase: JobPhase,
    limit: u32,
) -> Vec<String> {
    let mut completed: Vec<&Job> = jobs
        .filter(|job| {
            owned_by(job, owner)
                && job
                    .status
                    .as_ref()
                    .map_or(false, |status| status.phase == phase)
        })
        .collect();
    if completed.len() <= limit as usize {
        return Vec::new();
    }
    completed.sort_by_key(|job| {
        job.status
            .as_ref()
            .and_then(|status| status.completion_time)
    });
    completed
        .iter()
        .take(completed.len() - limit as usize)
        .map(|job| job.metadata.name.to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use resources::objects::{
        job::JobStatus,
        scaled_job::{JobTemplate, ScaledJobSpec, ScaledJob},
        Labels,
    };

    use super::*;

    fn scaled_job(max: u32) -> ScaledJob {
        ScaledJob {
            metadata: Metadata {
                name: "consumer".to_string(),
                namespace: "default".to_string(),
                ..Metadata::default()
            },
            spec: ScaledJobSpec {
                job_template: JobTemplate {
                    labels: Labels::new(),
                    spec: Default::default(),
                },
                polling_interval: 30,
                min_replica_count: 0,
                max_replica_count: max,
                successful_jobs_history_limit: 2,
                failed_jobs_history_limit: 2,
                fallback: None,
                triggers: Vec::new(),
            },
            status: None,
        }
    }

    fn job(owner: &ScaledJob, name: &str, phase: JobPhase, completed_at: i64) -> Job {
        let mut job = build_job(owner);
        job.metadata.name = name.to_string();
        job.status = Some(JobStatus {
            phase,
            start_time: None,
            completion_time: NaiveDateTime::from_timestamp_opt(completed_at, 0),
        });
        job
    }

    #[test]
    fn dispatches_the_difference_up_to_max() {
        // Running=2, desired=5, max=5: exactly 3 new executions.
        assert_eq!(dispatch_count(5, 2, 5), 3);
        // Fully satisfied.
        assert_eq!(dispatch_count(5, 5, 5), 0);
        // Desired above max is clamped.
        assert_eq!(dispatch_count(9, 2, 5), 3);
        // More running than allowed: never pre-empt, dispatch nothing.
        assert_eq!(dispatch_count(5, 7, 5), 0);
    }

    #[test]
    fn running_counts_pending_and_running_only() {
        let owner = scaled_job(5);
        let jobs = vec![
            job(&owner, "a", JobPhase::Pending, 0),
            job(&owner, "b", JobPhase::Running, 0),
            job(&owner, "c", JobPhase::Succeeded, 1),
            job(&owner, "d", JobPhase::Failed, 2),
        ];
        assert_eq!(running_executions(jobs.iter(), &owner), 2);
    }

    #[test]
    fn built_jobs_carry_the_owner_label_and_unique_names() {
        let owner = scaled_job(5);
        let a = build_job(&owner);
        let b = build_job(&owner);
        assert_ne!(a.metadata.name, b.metadata.name);
        assert!(a.metadata.name.starts_with("consumer-"));
        assert_eq!(
            a.metadata.labels.get(SCALED_JOB_NAME_LABEL).unwrap(),
            "consumer"
        );
    }

    #[test]
    fn prunes_oldest_completed_beyond_the_limit() {
        let owner = scaled_job(5);
        let jobs = vec![
            job(&owner, "old", JobPhase::Succeeded, 100),
            job(&owner, "older", JobPhase::Succeeded, 50),
            job(&owner, "new", JobPhase::Succeeded, 200),
            job(&owner, "running", JobPhase::Running, 0),
        ];
        let prune = history_to_prune(jobs.iter(), &owner, JobPhase::Succeeded, 2);
        assert_eq!(prune, vec!["older".to_string()]);
        assert!(history_to_prune(jobs.iter(), &owner, JobPhase::Failed, 2).is_empty());
    }
}
