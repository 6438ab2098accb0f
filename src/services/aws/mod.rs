// AWS Backends
// Managed-service implementations of the registry, secret store and control-plane seams

mod dynamodb;
mod ssm;
mod medialive;
mod mediaconnect;

pub use dynamodb::*;
pub use ssm::*;
pub use medialive::*;
pub use mediaconnect::*;

use aws_sdk_medialive::error::{ProvideErrorMetadata, SdkError};

use crate::services::ServiceError;

/// Convert an SDK failure into a `ServiceError` keyed by the service's error code.
///
/// Timeouts and dispatch failures carry no code, so they are given transient
/// codes for the retry classifier.
pub(crate) fn service_error<E, R>(err: SdkError<E, R>) -> ServiceError
where
    E: ProvideErrorMetadata,
{
    match &err {
        SdkError::TimeoutError(_) => ServiceError::new("RequestTimeout", "Request timed out"),
        SdkError::DispatchFailure(_) => ServiceError::new("ServiceUnavailable", "Request could not be dispatched"),
        _ => {
            let code = err.code().unwrap_or("Unknown").to_string();
            let message = err.message().unwrap_or("No error message").to_string();
            ServiceError::new(code, message)
        }
    }
}
