pub mod conversation;
pub mod conversation_list;
pub mod error_store;
pub mod message;
pub mod presence;
pub mod read_receipts;
pub mod scroll_anchor;
pub mod timeline;
