pub mod backend;
pub mod constants;
pub mod errors;
