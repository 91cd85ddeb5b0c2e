pub mod auth;
pub mod brute_force;
pub mod csrf;
pub mod errors;
pub mod flash;
pub mod session;
