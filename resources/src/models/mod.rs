use serde::{Deserialize, Serialize};

/// Envelope returned by every API server endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T: Serialize> {
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> Response<T>
where
    T: Serialize,
{
    pub fn new(msg: Option<String>, data: Option<T>) -> Self {
        Self { msg, data }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum WatchEvent<T> {
    Put(PutEvent<T>),
    Delete(DeleteEvent),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PutEvent<T> {
    pub key: String,
    pub object: T,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeleteEvent {
    pub key: String,
}
