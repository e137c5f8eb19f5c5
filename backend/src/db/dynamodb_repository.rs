use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use shared::ClassPrediction;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{Prediction, User};
use super::{PredictionRepository, RepositoryError, UserRepository};

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    users_table: String,
    predictions_table: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, users_table: String, predictions_table: String) -> Self {
        Self {
            client,
            users_table,
            predictions_table,
        }
    }

    /// Scans every page; DynamoDB applies the filter per page, so stopping
    /// at the first page would miss matches.
    async fn scan_all(
        &self,
        table: &str,
        filter_expression: &str,
        values: HashMap<String, AttributeValue>,
    ) -> Result<Vec<Item>, RepositoryError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(table)
                .filter_expression(filter_expression)
                .set_expression_attribute_values(Some(values.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            if let Some(page) = result.items {
                items.extend(page);
            }
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn find_user(
        &self,
        filter_expression: &str,
        placeholder: &str,
        value: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let values = HashMap::from([(
            placeholder.to_string(),
            AttributeValue::S(value.to_string()),
        )]);
        let items = self
            .scan_all(&self.users_table, filter_expression, values)
            .await?;

        match items.into_iter().next() {
            Some(item) => Ok(Some(parse_user_from_item(&item)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepository for DynamoDbRepository {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        log::info!(
            "Creating user in DynamoDB table '{}': {}",
            self.users_table,
            user.email
        );

        match self
            .client
            .put_item()
            .table_name(&self.users_table)
            .set_item(Some(user_to_item(user)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
        {
            Ok(_) => {
                log::info!("Created user {} ({})", user.id, user.email);
                Ok(())
            }
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|err| err.is_conditional_check_failed_exception())
                {
                    return Err(RepositoryError::Conflict(user.id.to_string()));
                }
                log::error!("DynamoDB put_item failed for user {}: {:?}", user.email, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(parse_user_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_provider_sub(
        &self,
        provider_sub: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.find_user("provider_sub = :provider_sub", ":provider_sub", provider_sub)
            .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.find_user("email = :email", ":email", email).await
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        log::info!("Updating user in DynamoDB: {}", user.email);

        let (update_expression, values) = user_update_expression(user);
        log::debug!("Update expression: {}", update_expression);

        let result = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(user.id.to_string()))
            .update_expression(update_expression)
            .condition_expression("attribute_exists(id)")
            .expression_attribute_names("#name", "name")
            .set_expression_attribute_values(Some(values))
            .send()
            .await;

        match result {
            Ok(_) => {
                log::info!("Successfully updated user: {}", user.email);
                Ok(())
            }
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|err| err.is_conditional_check_failed_exception())
                {
                    return Err(RepositoryError::NotFound);
                }
                log::error!(
                    "DynamoDB update_item failed for user {}: {:?}",
                    user.email,
                    e
                );
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn append_upload(&self, user_id: Uuid, url: &str) -> Result<(), RepositoryError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(user_id.to_string()))
            .update_expression(
                "SET uploads = list_append(if_not_exists(uploads, :empty), :url), updated_at = :now",
            )
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":empty", AttributeValue::L(Vec::new()))
            .expression_attribute_values(
                ":url",
                AttributeValue::L(vec![AttributeValue::S(url.to_string())]),
            )
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => {
                log::debug!("Appended upload to user {}", user_id);
                Ok(())
            }
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|err| err.is_conditional_check_failed_exception())
                {
                    return Err(RepositoryError::NotFound);
                }
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl PredictionRepository for DynamoDbRepository {
    async fn create_prediction(&self, prediction: &Prediction) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(&self.predictions_table)
            .set_item(Some(prediction_to_item(prediction)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| {
                log::error!(
                    "DynamoDB put_item failed for prediction {}: {:?}",
                    prediction.id,
                    e
                );
                RepositoryError::DynamoDb(e.to_string())
            })?;

        Ok(())
    }

    async fn get_prediction(
        &self,
        prediction_id: Uuid,
    ) -> Result<Option<Prediction>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.predictions_table)
            .key("id", AttributeValue::S(prediction_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(parse_prediction_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let values = HashMap::from([(
            ":user_id".to_string(),
            AttributeValue::S(user_id.to_string()),
        )]);
        let items = self
            .scan_all(&self.predictions_table, "user_id = :user_id", values)
            .await?;

        items.iter().map(parse_prediction_from_item).collect()
    }
}

// Item conversion

/// `SET` for present fields and `REMOVE` for absent optional ones, with the
/// matching `:field` values. `name` is reserved, hence `#name`.
fn user_update_expression(user: &User) -> (String, Item) {
    let mut set_parts: Vec<String> = vec![
        "provider_sub = :provider_sub".into(),
        "email = :email".into(),
        "#name = :name".into(),
        "updated_at = :updated_at".into(),
    ];
    let mut remove_parts = Vec::new();
    let mut values = HashMap::from([
        (
            ":provider_sub".to_string(),
            AttributeValue::S(user.provider_sub.clone()),
        ),
        (":email".to_string(), AttributeValue::S(user.email.clone())),
        (":name".to_string(), AttributeValue::S(user.name.clone())),
        (
            ":updated_at".to_string(),
            AttributeValue::S(user.updated_at.to_rfc3339()),
        ),
    ]);

    let optional_fields = [
        ("image", user.image.clone()),
        ("access_token", user.access_token.clone()),
        ("refresh_token", user.refresh_token.clone()),
        ("last_login", user.last_login.map(|t| t.to_rfc3339())),
    ];
    for (field, value) in optional_fields {
        match value {
            Some(value) => {
                set_parts.push(format!("{0} = :{0}", field));
                values.insert(format!(":{}", field), AttributeValue::S(value));
            }
            None => remove_parts.push(field),
        }
    }

    let mut update_expression = format!("SET {}", set_parts.join(", "));
    if !remove_parts.is_empty() {
        update_expression.push_str(&format!(" REMOVE {}", remove_parts.join(", ")));
    }

    (update_expression, values)
}

pub fn user_to_item(user: &User) -> Item {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(user.id.to_string()));
    item.insert(
        "provider_sub".to_string(),
        AttributeValue::S(user.provider_sub.clone()),
    );
    if let Some(access_token) = &user.access_token {
        item.insert(
            "access_token".to_string(),
            AttributeValue::S(access_token.clone()),
        );
    }
    if let Some(refresh_token) = &user.refresh_token {
        item.insert(
            "refresh_token".to_string(),
            AttributeValue::S(refresh_token.clone()),
        );
    }
    item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
    item.insert("name".to_string(), AttributeValue::S(user.name.clone()));
    if let Some(image) = &user.image {
        item.insert("image".to_string(), AttributeValue::S(image.clone()));
    }
    item.insert(
        "uploads".to_string(),
        AttributeValue::L(
            user.uploads
                .iter()
                .map(|url| AttributeValue::S(url.clone()))
                .collect(),
        ),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(user.created_at.to_rfc3339()),
    );
    item.insert(
        "updated_at".to_string(),
        AttributeValue::S(user.updated_at.to_rfc3339()),
    );
    if let Some(last_login) = &user.last_login {
        item.insert(
            "last_login".to_string(),
            AttributeValue::S(last_login.to_rfc3339()),
        );
    }
    item
}

pub fn parse_user_from_item(item: &Item) -> Result<User, RepositoryError> {
    let created_at = timestamp_attr(item, "created_at")?;

    let uploads = match item.get("uploads") {
        Some(value) => value
            .as_l()
            .map_err(|_| RepositoryError::InvalidData("Invalid uploads".to_string()))?
            .iter()
            .map(|entry| {
                entry
                    .as_s()
                    .cloned()
                    .map_err(|_| RepositoryError::InvalidData("Invalid upload url".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(User {
        id: uuid_attr(item, "id")?,
        provider_sub: string_attr(item, "provider_sub")?,
        access_token: optional_string_attr(item, "access_token"),
        refresh_token: optional_string_attr(item, "refresh_token"),
        name: string_attr(item, "name")?,
        email: string_attr(item, "email")?,
        image: optional_string_attr(item, "image"),
        uploads,
        created_at,
        updated_at: timestamp_attr(item, "updated_at").unwrap_or(created_at),
        last_login: timestamp_attr(item, "last_login").ok(),
    })
}

pub fn prediction_to_item(prediction: &Prediction) -> Item {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(prediction.id.to_string()));
    item.insert(
        "user_id".to_string(),
        AttributeValue::S(prediction.user.to_string()),
    );
    item.insert(
        "image_url".to_string(),
        AttributeValue::S(prediction.image_url.clone()),
    );
    item.insert(
        "predict_c".to_string(),
        class_prediction_to_attr(&prediction.predict_c),
    );
    item.insert(
        "predict_d".to_string(),
        class_prediction_to_attr(&prediction.predict_d),
    );
    item.insert(
        "final_prediction".to_string(),
        class_prediction_to_attr(&prediction.final_prediction),
    );
    item.insert(
        "secondary_prediction".to_string(),
        class_prediction_to_attr(&prediction.secondary_prediction),
    );
    item.insert(
        "created_at".to_string(),
        AttributeValue::S(prediction.created_at.to_rfc3339()),
    );
    item.insert(
        "updated_at".to_string(),
        AttributeValue::S(prediction.updated_at.to_rfc3339()),
    );
    item
}

pub fn parse_prediction_from_item(item: &Item) -> Result<Prediction, RepositoryError> {
    let created_at = timestamp_attr(item, "created_at")?;
    Ok(Prediction {
        id: uuid_attr(item, "id")?,
        user: uuid_attr(item, "user_id")?,
        image_url: string_attr(item, "image_url")?,
        predict_c: class_prediction_attr(item, "predict_c")?,
        predict_d: class_prediction_attr(item, "predict_d")?,
        final_prediction: class_prediction_attr(item, "final_prediction")?,
        secondary_prediction: class_prediction_attr(item, "secondary_prediction")?,
        created_at,
        updated_at: timestamp_attr(item, "updated_at").unwrap_or(created_at),
    })
}

fn class_prediction_to_attr(prediction: &ClassPrediction) -> AttributeValue {
    AttributeValue::M(HashMap::from([
        (
            "class".to_string(),
            AttributeValue::S(prediction.class.clone()),
        ),
        (
            "confidence".to_string(),
            AttributeValue::N(prediction.confidence.to_string()),
        ),
    ]))
}

fn class_prediction_attr(item: &Item, key: &str) -> Result<ClassPrediction, RepositoryError> {
    let invalid = || RepositoryError::InvalidData(format!("Invalid {}", key));
    let map = item
        .get(key)
        .and_then(|v| v.as_m().ok())
        .ok_or_else(invalid)?;

    Ok(ClassPrediction {
        class: string_attr(map, "class").map_err(|_| invalid())?,
        confidence: map
            .get("confidence")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<f64>().ok())
            .ok_or_else(invalid)?,
    })
}

fn string_attr(item: &Item, key: &str) -> Result<String, RepositoryError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn optional_string_attr(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn uuid_attr(item: &Item, key: &str) -> Result<Uuid, RepositoryError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn timestamp_attr(item: &Item, key: &str) -> Result<DateTime<Utc>, RepositoryError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(label: &str, confidence: f64) -> ClassPrediction {
        ClassPrediction {
            class: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn user_item_keeps_upload_order() {
        let mut user = User::new(
            "google_123".into(),
            "Asha Rao".into(),
            "asha@example.com".into(),
            None,
        );
        user.uploads = vec!["a.jpg".into(), "b.jpg".into()];
        user.refresh_token = Some("refresh".into());

        let item = user_to_item(&user);
        assert!(!item.contains_key("image"));
        assert!(!item.contains_key("access_token"));

        let parsed = parse_user_from_item(&item).unwrap();
        assert_eq!(parsed.id, user.id);
        assert_eq!(parsed.uploads, vec!["a.jpg", "b.jpg"]);
        assert_eq!(parsed.latest_upload(), Some("b.jpg"));
        assert_eq!(parsed.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(parsed.access_token, None);
    }

    #[test]
    fn update_sets_present_fields_and_removes_absent_ones() {
        let mut user = User::new(
            "google_123".into(),
            "Asha Rao".into(),
            "asha@example.com".into(),
            Some("https://cdn.test/avatar.png".into()),
        );
        user.access_token = Some("access".into());
        user.refresh_token = None;
        user.last_login = None;

        let (expression, values) = user_update_expression(&user);
        let (set, remove) = expression
            .strip_prefix("SET ")
            .and_then(|rest| rest.split_once(" REMOVE "))
            .unwrap();
        let set: Vec<&str> = set.split(", ").collect();
        let remove: Vec<&str> = remove.split(", ").collect();

        assert!(set.contains(&"image = :image"));
        assert!(set.contains(&"access_token = :access_token"));
        assert!(set.contains(&"#name = :name"));
        assert_eq!(remove, vec!["refresh_token", "last_login"]);

        for clause in &set {
            let (_, placeholder) = clause.split_once(" = ").unwrap();
            assert!(values.contains_key(placeholder), "no value for {}", placeholder);
        }
        assert_eq!(values.len(), set.len());
        assert_eq!(
            values.get(":access_token"),
            Some(&AttributeValue::S("access".into()))
        );
    }

    #[test]
    fn update_without_absent_fields_has_no_remove_clause() {
        let mut user = User::new(
            "google_123".into(),
            "Asha Rao".into(),
            "asha@example.com".into(),
            Some("https://cdn.test/avatar.png".into()),
        );
        user.access_token = Some("access".into());
        user.refresh_token = Some("refresh".into());
        user.update_last_login();

        let (expression, values) = user_update_expression(&user);
        assert!(!expression.contains("REMOVE"));
        assert!(expression.contains("last_login = :last_login"));
        assert!(expression.contains("refresh_token = :refresh_token"));
        assert_eq!(values.len(), 8);
    }

    #[test]
    fn legacy_user_without_uploads_parses_as_empty() {
        let mut item = user_to_item(&User::new(
            "sub".into(),
            "Name".into(),
            "n@example.com".into(),
            Some("https://avatar".into()),
        ));
        item.remove("uploads");
        let parsed = parse_user_from_item(&item).unwrap();
        assert!(parsed.uploads.is_empty());
        assert_eq!(parsed.image.as_deref(), Some("https://avatar"));
    }

    #[test]
    fn prediction_item_preserves_classifier_outputs() {
        let prediction = Prediction {
            id: Uuid::new_v4(),
            user: Uuid::new_v4(),
            image_url: "https://cdn.test/uploads/b.jpg".into(),
            predict_c: class("eczema", 0.8123456789),
            predict_d: class("psoriasis", 0.1),
            final_prediction: class("eczema", 0.8123456789),
            secondary_prediction: class("psoriasis", 0.1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let parsed = parse_prediction_from_item(&prediction_to_item(&prediction)).unwrap();
        assert_eq!(parsed.predict_c, prediction.predict_c);
        assert_eq!(parsed.secondary_prediction, prediction.secondary_prediction);
        assert_eq!(parsed.user, prediction.user);
    }

    #[test]
    fn malformed_class_prediction_is_rejected() {
        let mut item = prediction_to_item(&Prediction {
            id: Uuid::new_v4(),
            user: Uuid::new_v4(),
            image_url: "x".into(),
            predict_c: class("a", 0.5),
            predict_d: class("b", 0.5),
            final_prediction: class("a", 0.5),
            secondary_prediction: class("b", 0.5),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        item.insert("predict_d".into(), AttributeValue::S("not a map".into()));
        assert!(matches!(
            parse_prediction_from_item(&item),
            Err(RepositoryError::InvalidData(msg)) if msg == "Invalid predict_d"
        ));
    }
}
