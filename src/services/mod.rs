pub mod dashboard_service;
pub mod profile_service;
pub mod retry_policy;
