//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

/// Request and response body of the update-package-sizes endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePackSizes {
    pub sizes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateRequest {
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub packages: Vec<u64>,
}
