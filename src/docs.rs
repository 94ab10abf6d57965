use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::transactions::store_transaction,
        crate::api::webhooks_site::site_creation_webhook,
        crate::api::webhooks_site::site_data_webhook,
        crate::api::webhooks_paystack::paystack_webhook
    ),
    components(schemas(crate::api::webhooks_site::SiteCreationPayload)),
    tags(
        (name = "transaction", description = "Payment verification and transaction storage"),
        (name = "webhooks", description = "Callbacks from Paystack and the provisioning backend")
    )
)]
pub struct ApiDoc;
