//! School subsystems. Each module owns its operations, its row mapping and
//! a `schema()` description for `ecclesia schema`.

pub mod assignment;
pub mod authz;
pub mod batch;
pub mod certificate;
pub mod curriculum;
pub mod enrollment;
pub mod organization;
pub mod progression;
