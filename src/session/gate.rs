use super::SessionState;
use crate::models::Session;

/// What a protected route shows for a given session state.
#[derive(Debug, PartialEq)]
pub enum GateView<'a> {
    Loading,
    Login,
    Protected(&'a Session),
}

pub fn gate(state: &SessionState) -> GateView<'_> {
    match state {
        SessionState::Unknown => GateView::Loading,
        SessionState::Absent => GateView::Login,
        SessionState::Present(session) => GateView::Protected(session),
    }
}
