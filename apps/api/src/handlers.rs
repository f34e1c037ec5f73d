pub mod health;
pub mod integrations;
pub mod setup;
pub mod webhooks;
