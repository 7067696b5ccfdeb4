// SPDX-License-Identifier: GPL-3.0-or-later
pub mod events;
pub mod orchestrator;

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
