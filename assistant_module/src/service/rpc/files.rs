use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::NormalizedError;
use crate::models::{FileRecord, NewFileRecord};
use crate::store::run_blocking;
use crate::validation::{InputReader, ValidationFailure, ValidationIssue};
use crate::BoxError;

use super::super::auth::{check_create_scope, check_resource_scope};
use super::super::state::AppState;
use super::{invalid_input, CallContext};

const FILE_NAME_MAX: usize = 255;
const CONTENT_TYPE_MAX: usize = 128;
const ID_MAX: usize = 128;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub(super) async fn list_personal(state: &AppState, ctx: &CallContext) -> Result<Value, BoxError> {
    let user_id = ctx.require_identity()?.user_id.clone();
    let files = run_blocking(&state.store, move |store| {
        store.list_personal_files(&user_id)
    })
    .await?;
    Ok(json!(files))
}

pub(super) async fn list_group(state: &AppState, input: &Value) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let group_id = reader.required_string("groupId", 1, ID_MAX);
    reader.finish().map_err(invalid_input)?;
    let Some(group_id) = group_id else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("groupId"),
        )));
    };
    let files = run_blocking(&state.store, move |store| store.list_group_files(&group_id)).await?;
    Ok(json!(files))
}

pub(super) async fn upload(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let file_name = reader.required_string("fileName", 1, FILE_NAME_MAX);
    let content_type = reader.optional_string("contentType", CONTENT_TYPE_MAX);
    let bytes = reader.required_base64("content");
    let group_id = reader.optional_string("groupId", ID_MAX);
    reader.finish().map_err(invalid_input)?;
    let (Some(file_name), Some(bytes)) = (file_name, bytes) else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("fileName"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    let owner = check_create_scope(ctx.identity.as_ref(), group_id.as_deref())?;
    let scope = group_id.clone().unwrap_or_else(|| owner.clone());
    let storage_key = state.blobs.put(&scope, &file_name, &bytes).await?;

    let new_file = NewFileRecord {
        file_name,
        content_type: content_type
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        size_bytes: bytes.len() as i64,
        storage_key: storage_key.clone(),
        user_id: owner,
        group_id,
        message_id: None,
    };
    let created = match run_blocking(&state.store, move |store| store.insert_file(&new_file)).await
    {
        Ok(created) => created,
        Err(err) => {
            if let Err(cleanup) = state.blobs.delete(&storage_key).await {
                warn!("failed to remove orphaned blob {}: {}", storage_key, cleanup);
            }
            return Err(err.into());
        }
    };
    info!(
        "rpc stored file {} ({} bytes) for {}",
        created.id, created.size_bytes, created.user_id
    );
    Ok(json!(created))
}

async fn load_for_mutation(
    state: &AppState,
    ctx: &CallContext,
    file_id: &str,
    caller_group_id: Option<&str>,
) -> Result<FileRecord, BoxError> {
    let lookup = file_id.to_string();
    let existing = run_blocking(&state.store, move |store| store.get_file(&lookup))
        .await?
        .ok_or_else(|| NormalizedError::not_found("file", file_id))?;
    check_resource_scope(ctx.identity.as_ref(), existing.scope(), caller_group_id)?;
    Ok(existing)
}

pub(super) async fn rename(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let file_id = reader.required_string("fileId", 1, ID_MAX);
    let file_name = reader.required_string("fileName", 1, FILE_NAME_MAX);
    let group_id = reader.optional_string("groupId", ID_MAX);
    reader.finish().map_err(invalid_input)?;
    let (Some(file_id), Some(file_name)) = (file_id, file_name) else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("fileId"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    load_for_mutation(state, ctx, &file_id, group_id.as_deref()).await?;
    let renamed = run_blocking(&state.store, move |store| {
        store.rename_file(&file_id, &file_name)
    })
    .await?;
    Ok(json!(renamed))
}

pub(super) async fn delete(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let file_id = reader.required_string("fileId", 1, ID_MAX);
    let group_id = reader.optional_string("groupId", ID_MAX);
    reader.finish().map_err(invalid_input)?;
    let Some(file_id) = file_id else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("fileId"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    let existing = load_for_mutation(state, ctx, &file_id, group_id.as_deref()).await?;
    let deleted = file_id.clone();
    run_blocking(&state.store, move |store| store.delete_file(&deleted)).await?;
    if let Err(err) = state.blobs.delete(&existing.storage_key).await {
        warn!("failed to remove blob {}: {}", existing.storage_key, err);
    }
    info!("rpc deleted file {}", file_id);
    Ok(json!({ "id": file_id, "deleted": true }))
}
