use resources::objects::{
    scaled_job::ScaledJob,
    scaled_object::{Aggregation, Fallback, ScaledObject},
    trigger::Trigger,
    Object,
};

/// Uniform view over the two declarative target kinds, used by the cache
/// and the evaluator so they need not care which one they serve.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingTarget {
    Object(ScaledObject),
    Job(ScaledJob),
}

impl ScalingTarget {
    pub fn key(&self) -> String {
        match self {
            ScalingTarget::Object(so) => so.uri(),
            ScalingTarget::Job(sj) => sj.uri(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScalingTarget::Object(so) => so.kind(),
            ScalingTarget::Job(sj) => sj.kind(),
        }
    }

    pub fn name(&self) -> &String {
        match self {
            ScalingTarget::Object(so) => so.name(),
            ScalingTarget::Job(sj) => sj.name(),
        }
    }

    pub fn namespace(&self) -> &String {
        match self {
            ScalingTarget::Object(so) => so.namespace(),
            ScalingTarget::Job(sj) => sj.namespace(),
        }
    }

    pub fn generation(&self) -> i64 {
        match self {
            ScalingTarget::Object(so) => so.metadata.generation,
            ScalingTarget::Job(sj) => sj.metadata.generation,
        }
    }

    pub fn triggers(&self) -> &[Trigger] {
        match self {
            ScalingTarget::Object(so) => &so.spec.triggers,
            ScalingTarget::Job(sj) => &sj.spec.triggers,
        }
    }

    pub fn polling_interval(&self) -> u32 {
        match self {
            ScalingTarget::Object(so) => so.spec.polling_interval,
            ScalingTarget::Job(sj) => sj.spec.polling_interval,
        }
    }

    pub fn paused(&self) -> bool {
        match self {
            ScalingTarget::Object(so) => so.paused(),
            ScalingTarget::Job(sj) => sj.paused(),
        }
    }

    pub fn fallback(&self) -> Option<&Fallback> {
        match self {
            ScalingTarget::Object(so) => so.spec.fallback.as_ref(),
            ScalingTarget::Job(sj) => sj.spec.fallback.as_ref(),
        }
    }

    pub fn min_replicas(&self) -> Option<u32> {
        match self {
            ScalingTarget::Object(so) => so.spec.min_replica_count,
            ScalingTarget::Job(sj) => Some(sj.spec.min_replica_count),
        }
    }

    pub fn max_replicas(&self) -> u32 {
        match self {
            ScalingTarget::Object(so) => so.spec.max_replica_count,
            ScalingTarget::Job(sj) => sj.spec.max_replica_count,
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        match self {
            ScalingTarget::Object(so) => so.spec.advanced.aggregation,
            ScalingTarget::Job(_) => Aggregation::Max,
        }
    }

    /// Container the resolver reads env references from, when declared.
    pub fn env_source_container(&self) -> Option<&str> {
        match self {
            ScalingTarget::Object(so) => so
                .spec
                .scale_target_ref
                .env_source_container_name
                .as_deref(),
            ScalingTarget::Job(_) => None,
        }
    }
}
