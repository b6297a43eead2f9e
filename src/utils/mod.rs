pub mod crypto;
pub mod logging;
pub mod redirect;
pub mod responses;
