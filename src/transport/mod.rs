mod api_client;
mod retry_policy;

pub use api_client::{
    base_fields, encode_form_fields, header_map_from_pairs, ChatApiClient, ChatPayload,
    PayloadMessage, FILES_FIELD, MESSAGES_FIELD,
};
pub use retry_policy::RetryPolicy;
