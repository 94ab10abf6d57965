pub mod dashboard;
pub mod frappe_client;
pub mod paystack_client;
pub mod transactions;
pub mod webhooks_paystack;
pub mod webhooks_site;
