use crate::domains::access::domain::model::Role;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct GrantReq {
    pub role: Role,
    #[validate(length(min = 1, max = 128))]
    pub resource: String,
    #[validate(length(min = 1, max = 128))]
    pub action: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GrantResp {
    pub role: Role,
    pub resource: String,
    pub action: String,
    pub granted: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ProvisionReq {
    #[validate(length(min = 1, max = 64))]
    pub namespace: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProvisionResp {
    pub app_id: String,
    pub namespace: String,
    pub permissions_seeded: u32,
}
