use crate::backend::{Backend, BackendError, Filter};
use crate::models::{NewVolunteer, ProfileEdit, VolunteerRow};

pub const TABLE_VOLUNTEERS: &str = "volunteers";

fn by_id(user_id: &str) -> Filter {
    Filter::eq("id", user_id)
}

pub async fn load_volunteer(
    backend: &dyn Backend,
    access_token: &str,
    user_id: &str,
) -> Result<VolunteerRow, BackendError> {
    let value = backend
        .select_single(access_token, TABLE_VOLUNTEERS, &by_id(user_id))
        .await?;
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}

pub async fn update_volunteer_contact(
    backend: &dyn Backend,
    access_token: &str,
    user_id: &str,
    edit: &ProfileEdit,
) -> Result<(), BackendError> {
    let patch = serde_json::to_value(edit).map_err(|e| BackendError::Decode(e.to_string()))?;
    backend
        .update(access_token, TABLE_VOLUNTEERS, &by_id(user_id), patch)
        .await
}

pub async fn insert_volunteer(
    backend: &dyn Backend,
    access_token: &str,
    row: &NewVolunteer,
) -> Result<(), BackendError> {
    let row = serde_json::to_value(row).map_err(|e| BackendError::Decode(e.to_string()))?;
    backend.insert(access_token, TABLE_VOLUNTEERS, row).await
}
