pub mod broadcast;
pub mod payment;
pub mod subscriptions;
