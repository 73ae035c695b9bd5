//! Document state and logic (UI-agnostic).

mod eval;
mod io;
mod ops;
mod script;
mod state;

pub use eval::{CellKind, RenderedCell, RenderedRow, RenderedTable};
pub use state::Document;
