pub mod encoding;
pub mod http;
pub mod text;
