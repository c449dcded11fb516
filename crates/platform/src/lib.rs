//! Platform capabilities shared by every tenant: organizations, staff
//! accounts, authorization, audit logging, rate limiting and input validation.

pub mod audit;
pub mod authz;
pub mod rate_limit;
pub mod staff;
pub mod tenancy;
pub mod validation;

pub use audit::{AuditEntry, AuditFilter, AuditLog};
pub use authz::{authorize, require_super_admin, Actor, Permission};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use staff::{NewMember, Role, StaffDirectory, User, UserStatus};
pub use tenancy::{NewOrganization, OrgStatus, Organization, OrganizationRegistry};
