//! Row types. JSON keys are camelCase with the identifier under `_id`,
//! which is the shape the dashboard consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    /// Never leaves the process.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub image_path: String,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(rename = "_id")]
    pub id: String,
    pub upload_id: String,
    pub densenet_score: f64,
    pub mobilenet_score: f64,
    pub ensemble_score: f64,
    pub severity: String,
    pub tampered_ratio: f64,
    pub heatmap_paths: Vec<String>,
    pub created_at: f64,
}

/// Fields of a prediction before it is assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub upload_id: String,
    pub densenet_score: f64,
    pub mobilenet_score: f64,
    pub ensemble_score: f64,
    pub severity: String,
    pub tampered_ratio: f64,
    pub heatmap_paths: Vec<String>,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetric {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub version: String,
    pub accuracy: f64,
    pub f1_score: f64,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainTrigger {
    #[serde(rename = "_id")]
    pub id: String,
    pub admin_id: String,
    pub triggered_at: f64,
}

/// One upload with its latest prediction, as shown on the history timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub upload: Upload,
    pub prediction: Prediction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_json_hides_password_hash() {
        let user = User {
            id: "u1".into(),
            email: "a@b.c".into(),
            password_hash: "$argon2id$secret".into(),
            is_admin: true,
            created_at: 1.5,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["_id"], "u1");
        assert_eq!(json["isAdmin"], true);
        assert_eq!(json["createdAt"], 1.5);
        assert!(json.get("passwordHash").is_none());
        assert!(!json.to_string().contains("secret"));
    }

    #[test]
    fn test_prediction_json_keys() {
        let p = Prediction {
            id: "p1".into(),
            upload_id: "up1".into(),
            densenet_score: 0.1,
            mobilenet_score: 0.2,
            ensemble_score: 0.14,
            severity: "Authentic".into(),
            tampered_ratio: 0.05,
            heatmap_paths: vec!["h/full/heatmap.jpg".into()],
            created_at: 10.0,
        };
        let json = serde_json::to_value(&p).unwrap();
        for key in [
            "_id",
            "uploadId",
            "densenetScore",
            "mobilenetScore",
            "ensembleScore",
            "severity",
            "tamperedRatio",
            "heatmapPaths",
            "createdAt",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_metric_json_keys() {
        let m = ModelMetric {
            id: "m1".into(),
            name: "densenet121".into(),
            version: "v2".into(),
            accuracy: 0.93,
            f1_score: 0.91,
            created_at: 3.0,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["f1Score"], 0.91);
        assert_eq!(json["_id"], "m1");
    }
}
