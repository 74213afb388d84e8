//! Shared AWS SDK plumbing.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};

/// Loads the AWS SDK configuration from the default credential chain,
/// optionally pinned to a region.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let loader = aws_config::defaults(BehaviorVersion::latest());
    let loader = match region {
        Some(region) => loader.region(Region::new(region.to_string())),
        None => loader,
    };
    loader.load().await
}

/// Error codes services use to signal request throttling.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Returns true if an error code means the request was throttled.
pub(crate) fn is_throttling(code: Option<&str>) -> bool {
    code.is_some_and(|c| THROTTLING_CODES.contains(&c))
}

/// Text getters on SDK shapes return `&str` for members the service model
/// marks required and `Option<&str>` otherwise; enums behave the same way.
pub(crate) trait SdkText {
    /// Returns the text, or an empty string when absent.
    fn text(self) -> String;
}

impl<T: AsRef<str> + ?Sized> SdkText for &T {
    fn text(self) -> String {
        self.as_ref().to_string()
    }
}

impl<T: AsRef<str> + ?Sized> SdkText for Option<&T> {
    fn text(self) -> String {
        self.map(|t| t.as_ref().to_string()).unwrap_or_default()
    }
}

/// Integer getters, required or optional.
pub(crate) trait SdkNumber {
    /// Returns the number, if present.
    fn number(self) -> Option<i32>;
}

impl SdkNumber for i32 {
    fn number(self) -> Option<i32> {
        Some(self)
    }
}

impl SdkNumber for Option<i32> {
    fn number(self) -> Option<i32> {
        self
    }
}

/// Timestamp getters, required or optional.
pub(crate) trait SdkTime {
    /// Converts the timestamp to UTC.
    fn utc(self) -> Option<DateTime<Utc>>;
}

impl SdkTime for &aws_sdk_cloudformation::primitives::DateTime {
    fn utc(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs(), self.subsec_nanos())
    }
}

impl SdkTime for Option<&aws_sdk_cloudformation::primitives::DateTime> {
    fn utc(self) -> Option<DateTime<Utc>> {
        self.and_then(|t| t.utc())
    }
}
