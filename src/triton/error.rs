//! Classification of CloudAPI failures.

use reqwest::StatusCode;

use crate::compute::ApiError;

use super::types::ErrorBody;

/// Resource addressed by a request, used to label not-found errors.
#[derive(Clone, Copy, Debug)]
pub(super) struct Target<'a> {
    pub(super) resource: &'static str,
    pub(super) id: &'a str,
}

impl<'a> Target<'a> {
    pub(super) const fn new(resource: &'static str, id: &'a str) -> Self {
        Self { resource, id }
    }
}

pub(super) fn from_status(status: StatusCode, body: &[u8], target: Target<'_>) -> ApiError {
    let parsed = serde_json::from_slice::<ErrorBody>(body).unwrap_or_else(|_| ErrorBody {
        code: String::new(),
        message: String::from_utf8_lossy(body).trim().to_owned(),
    });

    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound {
            resource: target.resource.to_owned(),
            id: target.id.to_owned(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(if parsed.message.is_empty() {
            status.to_string()
        } else {
            parsed.message
        }),
        _ => ApiError::Rejected {
            status: status.as_u16(),
            code: if parsed.code.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_owned()
            } else {
                parsed.code
            },
            message: parsed.message,
        },
    }
}

pub(super) fn transport(err: &reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

pub(super) fn decode(err: &serde_json::Error) -> ApiError {
    ApiError::Decode(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_resource() {
        let err = from_status(
            StatusCode::NOT_FOUND,
            br#"{"code":"ResourceNotFound","message":"image not found"}"#,
            Target::new("image", "debian-8"),
        );
        assert_eq!(
            err,
            ApiError::NotFound {
                resource: String::from("image"),
                id: String::from("debian-8"),
            }
        );
    }

    #[test]
    fn rejection_keeps_provider_code() {
        let err = from_status(
            StatusCode::FORBIDDEN,
            br#"{"code":"NotAuthorized","message":"invalid signature"}"#,
            Target::new("machine", "b6979942"),
        );
        assert_eq!(err, ApiError::Auth(String::from("invalid signature")));

        let err = from_status(
            StatusCode::CONFLICT,
            br#"{"code":"QuotaExceeded","message":"machine quota reached"}"#,
            Target::new("machine", ""),
        );
        assert_eq!(
            err,
            ApiError::Rejected {
                status: 409,
                code: String::from("QuotaExceeded"),
                message: String::from("machine quota reached"),
            }
        );
    }

    #[test]
    fn non_json_body_becomes_message() {
        let err = from_status(
            StatusCode::BAD_GATEWAY,
            b"upstream unavailable\n",
            Target::new("machine", "b6979942"),
        );
        assert_eq!(
            err,
            ApiError::Rejected {
                status: 502,
                code: String::from("Bad Gateway"),
                message: String::from("upstream unavailable"),
            }
        );
    }
}
