//! Model catalog endpoint.

use axum::Json;
use stemsplit_jobs::StemCount;

use crate::models::{ModelCatalog, ModelEntry};

/// `GET /models` lists the supported stem configurations.
pub(crate) async fn list_models() -> Json<ModelCatalog> {
    let models = [StemCount::Two, StemCount::Four, StemCount::Five]
        .into_iter()
        .map(|stems| ModelEntry {
            stems: stems.as_u8(),
            name: format!("{}stems-16kHz", stems.as_u8()),
            description: stems.description().to_string(),
        })
        .collect();
    Json(ModelCatalog { models })
}
