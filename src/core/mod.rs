pub mod limits;
pub mod policy;
pub mod status;
