use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Metadata, Object};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigMap {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Object for ConfigMap {
    fn kind(&self) -> &'static str {
        "ConfigMap"
    }

    fn plural() -> &'static str {
        "configmaps"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
