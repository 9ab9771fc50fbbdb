use axum::{extract::State, Json};
use log::warn;
use serde::Deserialize;

use super::{ok, ok_with, AdminUser, ApiError, ApiJson, ApiPath, ApiQuery, AppState, Envelope};
use crate::error::PollError;
use crate::models::{CreatePollRequest, UpdatePollRequest, VoteReceipt, VoteRequest};
use crate::service::DEFAULT_PAGE_SIZE;
use crate::voting::{PollPage, PollView};

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    page: Option<String>,
    limit: Option<String>,
}

/// Lenient integer parsing: anything unparsable or non-positive falls back to `default`.
fn positive_or(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

pub async fn active(State(state): State<AppState>) -> ApiResult<Option<PollView>> {
    match state.polls.active_poll().await {
        Ok(poll) => Ok(ok(poll)),
        Err(PollError::MissingSchema) => {
            warn!("Poll tables are missing; answering /polls/active with no poll.");
            Ok(ok_with(None, "Tables missing, no poll returned"))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> ApiResult<PollView> {
    let poll = state.polls.get_poll(id).await?;
    Ok(ok(poll))
}

pub async fn vote(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<VoteRequest>,
) -> ApiResult<VoteReceipt> {
    let receipt = state.polls.vote(body.poll_id, body.option_id).await?;
    Ok(ok_with(receipt, "Vote recorded"))
}

pub async fn list(State(state): State<AppState>, ApiQuery(params): ApiQuery<ListParams>) -> ApiResult<PollPage> {
    let page = positive_or(params.page.as_deref(), 1);
    let limit = positive_or(params.limit.as_deref(), DEFAULT_PAGE_SIZE);
    let polls = state.polls.list_polls(page, limit).await?;
    Ok(ok(polls))
}

pub async fn create(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(body): ApiJson<CreatePollRequest>,
) -> ApiResult<PollView> {
    let poll = state.polls.create_poll(body).await?;
    Ok(ok_with(poll, "Poll created successfully"))
}

pub async fn update(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdatePollRequest>,
) -> ApiResult<PollView> {
    let poll = state.polls.update_poll(id, body).await?;
    Ok(ok_with(poll, "Poll updated successfully"))
}

pub async fn close(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<()> {
    state.polls.close_poll(id).await?;
    Ok(ok_with((), "Poll closed successfully"))
}

pub async fn delete(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<()> {
    state.polls.delete_poll(id).await?;
    Ok(ok_with((), "Poll deleted successfully"))
}
