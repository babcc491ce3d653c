//! AWS session handle
//!
//! Tasks reach EC2 through the [`Ec2`] trait so the same task code runs
//! against the real API or the file-backed [`mock::MockEc2`]. Provider error
//! codes are classified into [`ErrorCategory`] values here, once.

pub mod mock;

use reconcile::{Cloud, Context, ErrorCategory, TaskError, Tags, with_retry_logged};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// An EC2 API error: provider code plus message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify the provider code
    pub fn category(&self) -> ErrorCategory {
        let code = self.code.as_str();
        match code {
            "Throttling" | "RequestLimitExceeded" | "ServiceUnavailable" | "InternalError" => {
                ErrorCategory::Transient
            }
            "UnauthorizedOperation" | "AccessDenied" | "AuthFailure" => ErrorCategory::AccessDenied,
            _ if code.ends_with(".NotFound") => ErrorCategory::NotFound,
            _ => ErrorCategory::Rejected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

impl From<ApiError> for TaskError {
    fn from(e: ApiError) -> Self {
        Self::backend(e.category(), e.to_string())
    }
}

/// A key pair as EC2 describes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairInfo {
    pub key_pair_id: String,
    pub key_name: String,
    pub key_fingerprint: String,
    /// "rsa" or "ed25519"
    pub key_type: String,
    #[serde(default)]
    pub tags: Tags,
}

/// The subset of the EC2 API the tasks use
pub trait Ec2: Send + Sync + fmt::Debug {
    /// Describe key pairs by name. A missing name is an
    /// `InvalidKeyPair.NotFound` error, as the real API reports it.
    fn describe_key_pairs(&self, names: &[String]) -> Result<Vec<KeyPairInfo>, ApiError>;

    /// Import a public key, tagging the new key pair
    fn import_key_pair(
        &self,
        name: &str,
        public_key: &str,
        tags: &Tags,
    ) -> Result<KeyPairInfo, ApiError>;

    /// Add or overwrite tags on a resource
    fn create_tags(&self, resource_id: &str, tags: &Tags) -> Result<(), ApiError>;

    /// Current tags of a resource
    fn describe_tags(&self, resource_id: &str) -> Result<Tags, ApiError>;
}

/// AWS session: an EC2 client bound to a region
#[derive(Debug)]
pub struct AwsCloud {
    ec2: Box<dyn Ec2>,
    region: String,
}

impl AwsCloud {
    pub fn new(ec2: Box<dyn Ec2>, region: impl Into<String>) -> Self {
        Self {
            ec2,
            region: region.into(),
        }
    }

    pub fn ec2(&self) -> &dyn Ec2 {
        self.ec2.as_ref()
    }

    /// Ensure `expected` tags are present on a resource.
    ///
    /// Tags are only added or overwritten, never removed. Lookups go through
    /// the run's tag cache.
    pub fn add_tags(&self, ctx: &Context, resource_id: &str, expected: &Tags) -> Result<(), TaskError> {
        let actual = ctx.tags().get_or_load(resource_id, || {
            with_retry_logged(|| Ok(self.ec2.describe_tags(resource_id)?))
        })?;

        let missing: Tags = expected
            .iter()
            .filter(|(k, v)| actual.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        log::info!("Adding {} tag(s) to {}", missing.len(), resource_id);
        with_retry_logged(|| Ok(self.ec2.create_tags(resource_id, &missing)?))?;

        let mut merged = actual;
        merged.extend(missing);
        ctx.tags().insert(resource_id, merged);
        Ok(())
    }
}

impl Cloud for AwsCloud {
    fn provider(&self) -> &'static str {
        "aws"
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::fixtures::RSA;
    use mock::MockEc2;
    use std::sync::Arc;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ApiError::new("InvalidKeyPair.NotFound", "x").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            ApiError::new("RequestLimitExceeded", "x").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ApiError::new("UnauthorizedOperation", "x").category(),
            ErrorCategory::AccessDenied
        );
        assert_eq!(
            ApiError::new("InvalidKey.Format", "x").category(),
            ErrorCategory::Rejected
        );
    }

    #[test]
    fn test_api_error_into_task_error() {
        let err: TaskError = ApiError::new("UnauthorizedOperation", "no").into();
        assert!(err.is_access_denied());
        assert_eq!(err.to_string(), "access denied: UnauthorizedOperation: no");
    }

    #[test]
    fn test_add_tags_only_adds_missing() {
        let ec2 = MockEc2::new();
        let key = ec2
            .import_key_pair(
                "k",
                RSA,
                &Tags::from([("Name".to_string(), "k".to_string())]),
            )
            .unwrap();
        let cloud = Arc::new(AwsCloud::new(Box::new(ec2), "us-east-1"));
        let ctx = Context::new().with_cloud(cloud.clone());

        let expected = Tags::from([
            ("Name".to_string(), "k".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]);
        cloud.add_tags(&ctx, &key.key_pair_id, &expected).unwrap();

        assert_eq!(cloud.ec2().describe_tags(&key.key_pair_id).unwrap(), expected);
        assert_eq!(ctx.tags().get(&key.key_pair_id), Some(expected));
    }
}
