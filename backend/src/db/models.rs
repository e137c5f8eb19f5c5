use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ClassPrediction, PredictResponse};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    // Identity provider fields
    pub provider_sub: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    // Profile
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    /// Secure URLs of uploaded images, oldest first.
    pub uploads: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(provider_sub: String, name: String, email: String, image: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_sub,
            access_token: None,
            refresh_token: None,
            name,
            email,
            image,
            uploads: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login: Some(now),
        }
    }

    pub fn update_last_login(&mut self) {
        self.last_login = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn latest_upload(&self) -> Option<&str> {
        self.uploads.last().map(String::as_str)
    }

    pub fn has_upload(&self, url: &str) -> bool {
        self.uploads.iter().any(|u| u == url)
    }
}

/// Persisted classifier output for one image. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub user: Uuid,
    pub image_url: String,
    pub predict_c: ClassPrediction,
    pub predict_d: ClassPrediction,
    pub final_prediction: ClassPrediction,
    pub secondary_prediction: ClassPrediction,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn from_response(user: Uuid, response: &PredictResponse) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            image_url: response.image_url.clone(),
            predict_c: response.predict_c.clone(),
            predict_d: response.predict_d.clone(),
            final_prediction: response.final_prediction.clone(),
            secondary_prediction: response.secondary_prediction.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}
