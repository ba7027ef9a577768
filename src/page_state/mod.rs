//! Page State Module
//!
//! Merged per-page UI state, persistent tab selection and form drafts.

mod autosave;
mod manager;

pub use autosave::FormAutoSaver;
pub use manager::{
    form_key, page_state_key, tab_backup_key, PageFields, PageStateManager, ACTIVE_TAB, FORM_DATA,
    FORM_PREFIX, LAST_SAVED, PAGE_STATE_PREFIX, TAB_BACKUP_PREFIX,
};
