pub mod active;
pub mod executions;
pub mod push;
pub mod test_webhooks;
pub mod webhooks;
