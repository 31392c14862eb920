use access_service_core::domains::access::domain::model::Role;
use access_service_core::domains::access::dto::auth_dto::{
    AuthResp, CallbackReq, ErrorResp, InitiateReq, InitiateResp, RefreshReq, RevokeReq, RevokeResp,
};
use access_service_core::domains::access::dto::mfa_dto::{
    MfaEnrollResp, MfaStatusResp, MfaVerifyReq, MfaVerifyResp,
};
use access_service_core::domains::access::dto::policy_dto::{
    GrantReq, GrantResp, ProvisionReq, ProvisionResp,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parametric Portal Access Service",
        description = "Trust and access plane: OAuth login, MFA, session lifecycle, policy"
    ),
    paths(
        crate::handlers::health_check,
        crate::auth_handlers::oauth_initiate,
        crate::auth_handlers::oauth_callback,
        crate::auth_handlers::refresh,
        crate::auth_handlers::logout,
        crate::auth_handlers::revoke,
        crate::mfa_handlers::enroll,
        crate::mfa_handlers::verify,
        crate::mfa_handlers::disable,
        crate::mfa_handlers::status,
        crate::policy_handlers::grant,
        crate::policy_handlers::revoke,
        crate::policy_handlers::provision,
    ),
    components(schemas(
        InitiateReq,
        InitiateResp,
        CallbackReq,
        AuthResp,
        RefreshReq,
        RevokeReq,
        RevokeResp,
        MfaEnrollResp,
        MfaVerifyReq,
        MfaVerifyResp,
        MfaStatusResp,
        GrantReq,
        GrantResp,
        ProvisionReq,
        ProvisionResp,
        ErrorResp,
        Role,
    )),
    tags(
        (name = "auth", description = "OAuth login and session lifecycle"),
        (name = "mfa", description = "Multi-factor authentication"),
        (name = "policy", description = "Role permissions"),
        (name = "apps", description = "Tenant provisioning"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
