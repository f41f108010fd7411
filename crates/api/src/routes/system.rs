//! Root, liveness and UI string routes

use axum::{extract::Path, Json};
use serde::Serialize;
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "lucky-chat-api";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to Lucky Chat API" }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

/// Static UI strings; unknown languages get English
pub async fn translations(Path(language): Path<String>) -> Json<Value> {
    Json(translations_for(&language))
}

fn translations_for(language: &str) -> Value {
    match language.to_ascii_lowercase().as_str() {
        "nl" => json!({
            "general": {
                "play": "SPELEN",
                "professional": "Professioneel",
                "experience": "Ervaring",
                "expert": "Expert"
            },
            "home": {
                "professionalText": "Professioneel",
                "experienceText": "Ervaring"
            }
        }),
        _ => json!({
            "general": {
                "play": "PLAY",
                "professional": "Professional",
                "experience": "Experience",
                "expert": "Expert"
            },
            "home": {
                "professionalText": "Professional",
                "experienceText": "Experience"
            }
        }),
    }
}
