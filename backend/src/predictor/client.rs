use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::Value;
use shared::{ClassPrediction, PredictRequest, PredictResponse};

use super::PredictorError;

/// Thin client for the external classifier's `POST /predict` endpoint.
#[derive(Clone)]
pub struct PredictionClient {
    http_client: HttpClient,
    base_url: String,
}

impl PredictionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PredictorError> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn predict(&self, image_url: &str) -> Result<PredictResponse, PredictorError> {
        let predict_url = format!("{}/predict", self.base_url);
        log::info!("Requesting prediction for {}", image_url);

        let response = self
            .http_client
            .post(&predict_url)
            .json(&PredictRequest {
                image_url: image_url.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            log::warn!("Prediction service returned {} for {}", status, image_url);
            return Err(PredictorError::Upstream {
                status: status.as_u16(),
                detail: upstream_detail(&body),
            });
        }

        let prediction: PredictResponse = serde_json::from_slice(&body)
            .map_err(|e| PredictorError::Malformed(e.to_string()))?;
        validate_response(image_url, &prediction)?;

        log::info!(
            "Prediction for {}: {} ({:.3})",
            image_url,
            prediction.final_prediction.class,
            prediction.final_prediction.confidence
        );
        Ok(prediction)
    }
}

/// The `detail` field of an error body, or the whole body when it is missing,
/// null or empty.
fn upstream_detail(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut map)) => {
            let usable = match map.get("detail") {
                Some(Value::Null) | None => false,
                Some(Value::String(detail)) => !detail.is_empty(),
                Some(_) => true,
            };
            if usable {
                if let Some(detail) = map.remove("detail") {
                    return detail;
                }
            }
            Value::Object(map)
        }
        Ok(other) => other,
        Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

pub fn validate_response(requested_url: &str, response: &PredictResponse) -> Result<(), PredictorError> {
    if response.image_url != requested_url {
        return Err(PredictorError::Malformed(format!(
            "image_url mismatch: requested {}, got {}",
            requested_url, response.image_url
        )));
    }

    let outputs = [
        ("predict_c", &response.predict_c),
        ("predict_d", &response.predict_d),
        ("final_prediction", &response.final_prediction),
        ("secondary_prediction", &response.secondary_prediction),
    ];
    for (field, output) in outputs {
        validate_class_prediction(field, output)?;
    }
    Ok(())
}

fn validate_class_prediction(field: &str, output: &ClassPrediction) -> Result<(), PredictorError> {
    if output.class.trim().is_empty() {
        return Err(PredictorError::Malformed(format!("{}: empty class label", field)));
    }
    if !output.confidence.is_finite() || !(0.0..=1.0).contains(&output.confidence) {
        return Err(PredictorError::Malformed(format!(
            "{}: confidence {} outside [0, 1]",
            field, output.confidence
        )));
    }
    Ok(())
}
