use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Connection settings for S3-compatible backends (AWS or MinIO)
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the default AWS provider chain is used
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3Settings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub(crate) fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("path_style", &self.path_style)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn minio() -> S3Settings {
        S3Settings {
            endpoint: Some("http://minio:9000".to_string()),
            region: "us-east-1".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minio-secret".to_string()),
            path_style: true,
        }
    }

    #[test]
    fn test_static_credentials_need_both_keys() {
        assert_eq!(minio().static_credentials(), Some(("minioadmin", "minio-secret")));
        let partial = S3Settings {
            secret_key: None,
            ..minio()
        };
        assert_eq!(partial.static_credentials(), None);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let rendered = format!("{:?}", minio());
        assert!(!rendered.contains("minio-secret"));
        assert!(!rendered.contains("minioadmin"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("http://minio:9000"));
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_to_aws_variables() {
        std::env::remove_var("S3_ACCESS_KEY");
        std::env::remove_var("S3_SECRET_KEY");
        std::env::remove_var("S3_REGION");
        std::env::set_var("AWS_ACCESS_KEY_ID", "test_key");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "test_secret");
        std::env::set_var("AWS_REGION", "eu-west-1");

        let settings = S3Settings::from_env();
        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.static_credentials(), Some(("test_key", "test_secret")));

        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
        std::env::remove_var("AWS_REGION");
    }

    #[test]
    fn test_secrets_not_serialized() {
        let json = serde_json::to_string(&minio()).unwrap_or_default();
        assert!(!json.contains("minioadmin"));
        assert!(!json.contains("minio-secret"));
    }
}
