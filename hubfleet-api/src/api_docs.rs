use crate::handlers::instances;
use hubfleet_common::{InstanceStatus, InstanceView};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        instances::create_instance,
        instances::get_instance,
        instances::cancel_instance
    ),
    components(
        schemas(
            instances::CreateInstanceRequest,
            instances::ErrorBody,
            InstanceView,
            InstanceStatus
        )
    ),
    tags(
        (name = "hubfleet", description = "Tenant instance lifecycle API")
    )
)]
pub struct ApiDoc;
