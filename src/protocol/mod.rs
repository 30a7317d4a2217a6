pub mod decode;
pub mod interpret;
pub mod types;
