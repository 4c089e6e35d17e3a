pub mod article;
pub mod dashboard;
pub mod message;
pub mod progress;
pub mod refresh_token;
pub mod socratic;
pub mod user;
