use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::account::Account;
use crate::error::Result;
use crate::router::Valid;

#[derive(Deserialize, Validate)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 256,
        message = "Username must contain between 1 and 256 characters."
    ))]
    username: String,
    #[validate(length(
        min = 1,
        max = 1024,
        message = "Password must contain between 1 and 1024 characters."
    ))]
    password: String,
    /// Ask for owner privileges.
    #[serde(default)]
    owner: bool,
}

/// Handler to check credentials.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Account>> {
    let account = state
        .auth
        .authenticate(&body.username, &body.password, body.owner)
        .await?;

    Ok(Json(account))
}
