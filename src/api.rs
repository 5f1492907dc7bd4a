use axum::{
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use crate::AppState;
use crate::catalog::{CatalogError, ImageRecord, ReactionValue};

fn catalog_error_response(e: CatalogError) -> Response {
    if e.is_not_found() {
        debug!("Lookup failed: {}", e);
        return (StatusCode::NOT_FOUND, e.to_string()).into_response();
    }

    match e {
        CatalogError::StoreError(e) => {
            error!("Metadata store request failed: {}", e);
            (StatusCode::BAD_GATEWAY, "Metadata store unavailable").into_response()
        }
        e => {
            error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn respond<T: serde::Serialize>(result: Result<T, CatalogError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => catalog_error_response(e),
    }
}

pub async fn list_groups_handler(State(app_state): State<AppState>) -> Json<Vec<String>> {
    Json(app_state.library.registry().names())
}

pub async fn list_images_handler(
    State(app_state): State<AppState>,
    Path(group): Path<String>,
) -> Response {
    let group = match app_state.library.group(&group) {
        Ok(group) => group,
        Err(e) => return catalog_error_response(e),
    };

    let mut records: Vec<ImageRecord> = Vec::with_capacity(group.len());
    for image in group.images().await {
        records.push(image.to_record().await);
    }
    Json(records).into_response()
}

pub async fn random_image_handler(
    State(app_state): State<AppState>,
    Path(group): Path<String>,
) -> Response {
    let group = match app_state.library.group(&group) {
        Ok(group) => group,
        Err(e) => return catalog_error_response(e),
    };

    match group.random().await {
        Some(image) => Json(image.to_record().await).into_response(),
        None => (StatusCode::NOT_FOUND, "Group is empty").into_response(),
    }
}

pub async fn get_image_handler(
    State(app_state): State<AppState>,
    Path((group, id)): Path<(String, String)>,
) -> Response {
    match app_state.library.image(&group, &id) {
        Ok(image) => Json(image.to_record().await).into_response(),
        Err(e) => catalog_error_response(e),
    }
}

pub async fn add_tag_handler(
    State(app_state): State<AppState>,
    Path((group, id)): Path<(String, String)>,
    Json(tag): Json<String>,
) -> Response {
    respond(app_state.library.add_tag(&group, &id, tag).await)
}

pub async fn replace_tags_handler(
    State(app_state): State<AppState>,
    Path((group, id)): Path<(String, String)>,
    Json(tags): Json<Vec<String>>,
) -> Response {
    respond(app_state.library.replace_tags(&group, &id, tags).await)
}

pub async fn remove_tag_handler(
    State(app_state): State<AppState>,
    Path((group, id, tag)): Path<(String, String, String)>,
) -> Response {
    respond(app_state.library.remove_tag(&group, &id, &tag).await)
}

pub async fn add_reaction_handler(
    State(app_state): State<AppState>,
    Path((group, id, reaction)): Path<(String, String, String)>,
    Json(value): Json<ReactionValue>,
) -> Response {
    respond(
        app_state
            .library
            .add_reaction(&group, &id, &reaction, value)
            .await,
    )
}

pub async fn replace_reactions_handler(
    State(app_state): State<AppState>,
    Path((group, id, reaction)): Path<(String, String, String)>,
    Json(values): Json<Vec<ReactionValue>>,
) -> Response {
    respond(
        app_state
            .library
            .replace_reactions(&group, &id, &reaction, values)
            .await,
    )
}

pub async fn remove_reaction_handler(
    State(app_state): State<AppState>,
    Path((group, id, reaction, key)): Path<(String, String, String, String)>,
) -> Response {
    respond(
        app_state
            .library
            .remove_reaction(&group, &id, &reaction, &key)
            .await,
    )
}

/// Stream a cataloged file. Only names present in the group's catalog are
/// served, so nothing outside the content root is reachable.
pub async fn raw_image_handler(
    State(app_state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> Response {
    let image = match app_state.library.group(&group) {
        Ok(group) => match group.get(&name) {
            Some(image) => image,
            None => return (StatusCode::NOT_FOUND, "Image not found").into_response(),
        },
        Err(e) => return catalog_error_response(e),
    };

    let file = match File::open(&image.path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cataloged file {:?} could not be opened: {}", image.path, e);
            return (StatusCode::NOT_FOUND, "Image not found").into_response();
        }
    };

    let content_type = mime_guess::from_path(&image.path)
        .first_or_octet_stream()
        .to_string();

    let body = Body::from_stream(ReaderStream::new(file));

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build response for {:?}: {}", image.path, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
