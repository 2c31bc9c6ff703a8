pub mod protocol;

pub use protocol::{
    Command, Gesture, HandLabel, HandResult, Landmark, Point, ServerMessage, Snapshot,
};
