use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiry_hours: i64,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Hosted UI origin, e.g. `https://<domain>.auth.<region>.amazoncognito.com`.
    pub auth_base_url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub public_base_url: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub default_folder: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub users_table: String,
    pub predictions_table: String,
}

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub base_url: String,
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub predictor: PredictorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let port = vars.parsed("PORT", 8081u16)?;
        let base_url = vars
            .optional("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let frontend_url = vars
            .optional("FRONTEND_URL")
            .unwrap_or_else(|| base_url.clone());

        let region = vars.required("AWS_REGION")?;

        let cognito_domain = vars.required("COGNITO_DOMAIN")?;
        let auth_base_url = vars.optional("COGNITO_AUTH_URL").unwrap_or_else(|| {
            format!("https://{}.auth.{}.amazoncognito.com", cognito_domain, region)
        });
        let identity = IdentityConfig {
            client_id: vars.required("COGNITO_CLIENT_ID")?,
            client_secret: vars.required("COGNITO_CLIENT_SECRET")?,
            redirect_uri: vars.required("COGNITO_REDIRECT_URI")?,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
        };

        let bucket = vars.required("S3_BUCKET_NAME")?;
        let public_base_url = vars
            .optional("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("https://{}.s3.{}.amazonaws.com", bucket, region));
        let storage = StorageConfig {
            bucket,
            region: region.clone(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            endpoint_url: vars.optional("S3_ENDPOINT_URL"),
            access_key_id: vars.optional("S3_ACCESS_KEY_ID"),
            secret_access_key: vars.optional("S3_SECRET_ACCESS_KEY"),
            default_folder: vars
                .optional("UPLOAD_FOLDER")
                .unwrap_or_else(|| "uploads".to_string()),
        };

        let expiry_hours = vars.parsed("JWT_EXPIRY_HOURS", 24i64)?;
        if expiry_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "JWT_EXPIRY_HOURS",
                message: "must be positive".to_string(),
            });
        }

        Ok(Self {
            port,
            base_url,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            jwt: JwtConfig {
                secret: vars.required("JWT_SECRET")?,
                expiry_hours,
            },
            identity,
            storage,
            database: DatabaseConfig {
                users_table: vars.required("DYNAMODB_USERS_TABLE")?,
                predictions_table: vars.required("DYNAMODB_PREDICTIONS_TABLE")?,
            },
            predictor: PredictorConfig {
                base_url: vars
                    .required("PREDICTION_API_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                timeout: Duration::from_secs(vars.parsed("PREDICTION_TIMEOUT_SECS", 60u64)?),
            },
        })
    }

    /// Placeholder values from the sample `.env` mean the hosted UI was never set up.
    pub fn identity_configured(&self) -> bool {
        !self.identity.client_id.contains("your_cognito")
            && !self.identity.auth_base_url.contains("your_cognito")
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
            None => {
                log::debug!("{} not set, using default", key);
                Ok(default)
            }
        }
    }
}
