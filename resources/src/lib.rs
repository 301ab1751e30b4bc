pub mod config;
pub mod informer;
pub mod models;
pub mod objects;

pub mod proto {
    pub mod metricsservice {
        tonic::include_proto!("metricsservice");
    }
}
