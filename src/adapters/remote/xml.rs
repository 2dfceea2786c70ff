//! S3 XML documents read on the control path (errors and bucket location).

use serde::Deserialize;

use super::api::{ApiError, ApiResult, ServiceError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorDocument {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationConstraint {
    #[serde(rename = "$text", default)]
    region: String,
}

/// Decode an error response. Bodiless responses (HEAD) fall back to the
/// HTTP status.
pub fn parse_error(status: u16, body: &str) -> ServiceError {
    match quick_xml::de::from_str::<ErrorDocument>(body) {
        Ok(doc) => ServiceError {
            status,
            code: doc.code,
            message: doc.message,
            endpoint: doc.endpoint.filter(|e| !e.is_empty()),
        },
        Err(_) => {
            let code = match status {
                301 => super::api::PERMANENT_REDIRECT,
                403 => "AccessDenied",
                404 => "NotFound",
                _ => "UnknownError",
            };
            ServiceError::new(status, code, body.trim())
        }
    }
}

/// Decode a `LocationConstraint` document into a region name.
pub fn parse_location(body: &str) -> ApiResult<String> {
    let doc: LocationConstraint = quick_xml::de::from_str(body)
        .map_err(|e| ApiError::Decode(format!("LocationConstraint: {}", e)))?;
    Ok(normalize_region(doc.region.trim()).to_string())
}

/// Legacy location constraints name regions differently.
fn normalize_region(region: &str) -> &str {
    match region {
        "" | "US" => "us-east-1",
        "EU" => "eu-west-1",
        other => other,
    }
}

/// Endpoint hostname for a region.
pub fn region_hostname(region: &str) -> String {
    match normalize_region(region) {
        "us-east-1" => super::DEFAULT_HOSTNAME.to_string(),
        other => format!("s3.{}.amazonaws.com", other),
    }
}

/// Signing region implied by an endpoint hostname.
///
/// Recognises `s3.amazonaws.com`, `s3.<region>.amazonaws.com` and the legacy
/// `s3-<region>.amazonaws.com`; anything else signs as `us-east-1`.
pub fn region_from_hostname(hostname: &str) -> String {
    let host = hostname.split(':').next().unwrap_or(hostname);
    let Some(head) = host.strip_suffix(".amazonaws.com") else {
        return "us-east-1".to_string();
    };
    let region = head
        .strip_prefix("s3.")
        .or_else(|| head.strip_prefix("s3-"))
        .unwrap_or("");
    // dualstack and similar qualifiers precede the region
    let region = region.rsplit('.').next().unwrap_or(region);
    if region.is_empty() || region == "s3" || region == "external-1" {
        "us-east-1".to_string()
    } else {
        region.to_string()
    }
}
