pub mod admin;
pub mod admin_auth;
pub mod client_auth;
pub mod health;
pub mod messages;
pub mod request_id;
