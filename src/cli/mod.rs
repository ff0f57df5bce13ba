pub mod errors;
pub mod mutate;
pub mod status;
