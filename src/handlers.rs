use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State, multipart::MultipartError},
    http::{StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use tracing::{error, info};

use crate::{error::AppError, models::*, state::AppState};

/// Upload one asset, either as multipart/form-data or as a JSON body
/// carrying base64 data.
pub async fn upload_file(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, AppError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let upload = if is_json {
        let Json(body) = Json::<Base64Upload>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        from_base64(body)?
    } else {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::MultipartError(e.body_text()))?;
        from_multipart(multipart).await?
    };

    info!(
        size = upload.data.len(),
        filename = %upload.filename,
        force = upload.force,
        "Upload received"
    );

    let record = state.ingestor.ingest(upload).await?;
    let urls = FileUrls {
        image: state.config.image_url(&record.filename),
        thumbnail: state.config.thumbnail_url(&record.thumb_filename),
    };

    Ok(Json(UploadResponse {
        status: "success",
        message: "File uploaded successfully",
        data: FileResponse { record, urls },
    }))
}

async fn from_multipart(mut multipart: Multipart) -> Result<UploadRequest, AppError> {
    // Temporary holders for multipart fields
    let mut file_data: Option<Bytes> = None;
    let mut original_filename: Option<String> = None;
    let mut custom_filename: Option<String> = None;
    let mut force = false;

    // Parse multipart fields
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error!("Error parsing multipart: {}", e);
        AppError::MultipartError(format!("Failed to parse multipart form: {}", e))
    })? {
        match field.name().unwrap_or("") {
            "file" => {
                original_filename = field.file_name().map(|s| s.to_string());
                // Read file bytes
                let data = field.bytes().await.map_err(|e| {
                    error!("Error reading file bytes: {}", e);
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        AppError::PayloadTooLarge(e.body_text())
                    } else {
                        AppError::MultipartError(format!("Failed to read the file: {}", e))
                    }
                })?;
                file_data = Some(data);
            }
            "filename" => {
                // Optional custom filename
                let name = field.text().await.map_err(field_error)?;
                if !name.trim().is_empty() {
                    custom_filename = Some(name);
                }
            }
            "force" => {
                force = field.text().await.map_err(field_error)?.trim() == "true";
            }
            _ => {}
        }
    }

    let data = file_data.ok_or_else(|| AppError::BadRequest("No file provided".into()))?;
    Ok(UploadRequest {
        data,
        filename: custom_filename.or(original_filename).unwrap_or_default(),
        force,
    })
}

fn field_error(e: MultipartError) -> AppError {
    error!("Error reading multipart field: {}", e);
    AppError::MultipartError(format!("Failed to read form field: {}", e))
}

fn from_base64(body: Base64Upload) -> Result<UploadRequest, AppError> {
    let data = decode_image_field(&body.image)?;
    Ok(UploadRequest {
        data,
        filename: body.filename.unwrap_or_default(),
        force: body.force,
    })
}

/// Accepts bare base64 or a `data:<mime>;base64,<payload>` URL.
fn decode_image_field(image: &str) -> Result<Bytes, AppError> {
    let image = image.trim();
    let payload = match image.strip_prefix("data:") {
        Some(url) => url
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| AppError::BadRequest("Malformed data URL".into()))?,
        None => image,
    };

    STANDARD
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 image data: {}", e)))
}
