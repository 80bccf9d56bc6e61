use serde::{Deserialize, Serialize};

/// One entry of the provider-declared model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub name: String,
    pub provider: String,
}

impl ModelInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            name: name.into(),
            provider: provider.into(),
        }
    }
}

/// `GET /v1/models` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelList {
    pub fn new(data: Vec<ModelInfo>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}
