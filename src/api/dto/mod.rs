//! Data Transfer Objects for REST request/response serialization.

pub mod account_dto;
pub mod common_dto;
pub mod job_dto;

pub use account_dto::*;
pub use common_dto::*;
pub use job_dto::*;
