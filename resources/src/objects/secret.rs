use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Metadata, Object};

/// Opaque credential payload; values are base64-encoded on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Secret {
    pub metadata: Metadata,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Object for Secret {
    fn kind(&self) -> &'static str {
        "Secret"
    }

    fn plural() -> &'static str {
        "secrets"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
