pub mod presence_index;

pub use presence_index::{OnlineUserInfo, PresenceIndex};
